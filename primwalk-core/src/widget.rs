//! # Widgets
//!
//! A closed set of widget kinds plus a [`WidgetKind::Custom`] escape hatch, all driven through
//! [`Widget::emit`] (draw into a [`DrawList`]) and [`Widget::handle_pointer`] (input).
//!
//! Interaction state sits behind a lock shared by the input path and the render path, so a
//! widget tree can be borrowed immutably by both.

use std::sync::Arc;

use crate::cache::TextureHandle;
use crate::color::Color;
use crate::draw::DrawList;
use crate::font::Font;
use crate::util::Rect;

/// Rate at which the displayed color chases its target, per second.
const COLOR_FOLLOW_RATE: f32 = 16.0;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PointerEvent {
    Moved([f32; 2]),
    Pressed([f32; 2]),
    Released([f32; 2]),
    /// The pointer left the window.
    Left,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// A press and release both landed on this widget.
    pub clicked: bool,
    /// Menu item index chosen by this event.
    pub selected: Option<usize>,
    /// Visual state changed, a redraw is needed.
    pub redraw: bool,
}
impl Response {
    #[must_use]
    fn union(self, other: Self) -> Self {
        Self {
            clicked: self.clicked || other.clicked,
            selected: self.selected.or(other.selected),
            redraw: self.redraw || other.redraw,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InteractionState {
    pub hovered: bool,
    pub pressed: bool,
    /// Interpolated toward the style color for the current hover/press state on each emit.
    pub display_color: Color,
    /// Menu row under the pointer.
    pub hovered_item: Option<usize>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ButtonStyle {
    pub idle: Color,
    pub hovered: Color,
    pub pressed: Color,
    pub text: Color,
    pub text_size: f32,
    pub border_radius: f32,
}
impl Default for ButtonStyle {
    fn default() -> Self {
        Self {
            idle: Color::from_rgba8([60, 60, 68, 255]),
            hovered: Color::from_rgba8([80, 80, 92, 255]),
            pressed: Color::from_rgba8([40, 40, 46, 255]),
            text: Color::WHITE,
            text_size: 16.0,
            border_radius: 4.0,
        }
    }
}
impl ButtonStyle {
    fn target(&self, state: &InteractionState) -> Color {
        match (state.pressed, state.hovered) {
            (true, _) => self.pressed,
            (false, true) => self.hovered,
            (false, false) => self.idle,
        }
    }
}

/// User-defined widget behavior. `bounds` is the owning [`Widget`]'s rectangle.
pub trait CustomWidget<T>: Send + Sync {
    fn emit(&self, bounds: Rect, state: &InteractionState, list: &mut DrawList<T>);
    /// Called after the common hover/press bookkeeping.
    fn handle_pointer(&self, _bounds: Rect, _state: &mut InteractionState, _event: PointerEvent) -> Response {
        Response::default()
    }
}

pub enum WidgetKind<T> {
    Button {
        label: String,
        font: Arc<Font<T>>,
        style: ButtonStyle,
    },
    Label {
        text: String,
        font: Arc<Font<T>>,
        size: f32,
        color: Color,
    },
    /// Groups children. Draws nothing itself.
    Container { children: Vec<Widget<T>> },
    /// A tinted texture.
    Icon { texture: Arc<T>, tint: Color },
    /// A filled, optionally rounded backdrop.
    Panel { color: Color, border_radius: f32 },
    /// A vertical list of rows of `item_height`, the hovered row highlighted.
    Menu {
        items: Vec<String>,
        font: Arc<Font<T>>,
        item_height: f32,
        style: ButtonStyle,
    },
    /// An untinted texture, stretched to the bounds.
    Image { texture: Arc<T> },
    Custom(Arc<dyn CustomWidget<T>>),
}

pub struct Widget<T> {
    pub bounds: Rect,
    pub kind: WidgetKind<T>,
    state: parking_lot::Mutex<InteractionState>,
}
impl<T: TextureHandle> Widget<T> {
    pub fn new(bounds: Rect, kind: WidgetKind<T>) -> Self {
        let display_color = match &kind {
            WidgetKind::Button { style, .. } | WidgetKind::Menu { style, .. } => style.idle,
            WidgetKind::Panel { color, .. } => *color,
            _ => Color::WHITE,
        };
        Self {
            bounds,
            kind,
            state: parking_lot::Mutex::new(InteractionState {
                hovered: false,
                pressed: false,
                display_color,
                hovered_item: None,
            }),
        }
    }
    /// Snapshot of the interaction state.
    pub fn state(&self) -> InteractionState {
        *self.state.lock()
    }
    /// Whether `point` falls within this widget's bounds.
    pub fn hit(&self, point: [f32; 2]) -> bool {
        self.bounds.contains(point)
    }
    /// Append this widget (and its children) to `list`. `dt` is the seconds since the last emit,
    /// used to animate hover colors.
    pub fn emit(&self, list: &mut DrawList<T>, dt: f32) {
        let bounds = self.bounds;
        let [width, height] = bounds.size;
        let state = {
            let mut state = self.state.lock();
            if let WidgetKind::Button { style, .. } = &self.kind {
                let t = (dt.max(0.0) * COLOR_FOLLOW_RATE).min(1.0);
                let target = style.target(&state);
                state.display_color = state.display_color.lerp(target, t);
            }
            *state
        };
        match &self.kind {
            WidgetKind::Button { label, font, style } => {
                list.draw_rect(
                    bounds.position,
                    width,
                    height,
                    state.display_color,
                    Some(style.border_radius),
                    None,
                );
                let text_width = font.text_width(label, style.text_size);
                let text_height = font.line_height(style.text_size);
                let [cx, cy] = bounds.center();
                list.draw_text(
                    [cx - text_width / 2.0, cy - text_height / 2.0],
                    label,
                    style.text_size,
                    style.text,
                    font,
                );
            }
            WidgetKind::Label {
                text,
                font,
                size,
                color,
            } => list.draw_text(bounds.position, text, *size, *color, font),
            WidgetKind::Container { children } => {
                for child in children {
                    child.emit(list, dt);
                }
            }
            WidgetKind::Icon { texture, tint } => {
                list.draw_rect(bounds.position, width, height, *tint, None, Some(texture));
            }
            WidgetKind::Panel {
                color,
                border_radius,
            } => list.draw_rect(
                bounds.position,
                width,
                height,
                *color,
                Some(*border_radius),
                None,
            ),
            WidgetKind::Menu {
                items,
                font,
                item_height,
                style,
            } => {
                for (idx, item) in items.iter().enumerate() {
                    let y = bounds.position[1] + idx as f32 * item_height;
                    let color = if state.hovered_item == Some(idx) {
                        if state.pressed {
                            style.pressed
                        } else {
                            style.hovered
                        }
                    } else {
                        style.idle
                    };
                    list.draw_rect([bounds.position[0], y], width, *item_height, color, None, None);
                    let text_y = y + (item_height - font.line_height(style.text_size)) / 2.0;
                    list.draw_text(
                        [bounds.position[0] + style.border_radius, text_y],
                        item,
                        style.text_size,
                        style.text,
                        font,
                    );
                }
            }
            WidgetKind::Image { texture } => {
                list.draw_rect(bounds.position, width, height, Color::WHITE, None, Some(texture));
            }
            WidgetKind::Custom(custom) => custom.emit(bounds, &state, list),
        }
    }
    /// Feed a pointer event. Containers forward to every child.
    pub fn handle_pointer(&self, event: PointerEvent) -> Response {
        let mut response = Response::default();
        if let WidgetKind::Container { children } = &self.kind {
            for child in children {
                response = response.union(child.handle_pointer(event));
            }
        }

        let mut state = self.state.lock();
        let before = *state;
        match event {
            PointerEvent::Moved(point) => {
                state.hovered = self.hit(point);
            }
            PointerEvent::Pressed(point) => {
                state.hovered = self.hit(point);
                state.pressed = state.hovered;
            }
            PointerEvent::Released(point) => {
                state.hovered = self.hit(point);
                response.clicked |= state.pressed && state.hovered;
                state.pressed = false;
            }
            PointerEvent::Left => {
                state.hovered = false;
                state.pressed = false;
            }
        }

        match &self.kind {
            WidgetKind::Menu {
                items, item_height, ..
            } => {
                state.hovered_item = match event {
                    PointerEvent::Moved(point)
                    | PointerEvent::Pressed(point)
                    | PointerEvent::Released(point)
                        if state.hovered && *item_height > 0.0 =>
                    {
                        let row = ((point[1] - self.bounds.position[1]) / item_height) as usize;
                        (row < items.len()).then_some(row)
                    }
                    _ => None,
                };
                if response.clicked {
                    response.selected = state.hovered_item;
                }
            }
            WidgetKind::Custom(custom) => {
                response = response.union(custom.handle_pointer(self.bounds, &mut state, event));
            }
            _ => (),
        }

        response.redraw |= state.hovered != before.hovered
            || state.pressed != before.pressed
            || state.hovered_item != before.hovered_item;
        response
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{
        ButtonStyle, CustomWidget, InteractionState, PointerEvent, Response, Widget, WidgetKind,
    };
    use crate::cache::test::MockTexture;
    use crate::color::Color;
    use crate::draw::DrawList;
    use crate::font::{
        atlas::{test::SyntheticSource, AtlasBuilder, AtlasConfig},
        Font, FontKey,
    };
    use crate::util::Rect;

    fn font() -> Arc<Font<MockTexture>> {
        let atlas = AtlasBuilder::new(AtlasConfig::default())
            .unwrap()
            .load(&SyntheticSource)
            .unwrap()
            .color_edges()
            .pack()
            .unwrap()
            .generate()
            .unwrap()
            .commit();
        let texture = MockTexture::new(atlas.bitmap.extent());
        Arc::new(Font::new(FontKey::new("Boxes", 400, false), atlas.face, texture))
    }
    fn button(font: Arc<Font<MockTexture>>) -> Widget<MockTexture> {
        Widget::new(
            Rect::new([10.0, 10.0], [100.0, 30.0]),
            WidgetKind::Button {
                label: "OK".into(),
                font,
                style: ButtonStyle::default(),
            },
        )
    }

    #[test]
    fn click_needs_press_and_release_inside() {
        let button = button(font());
        let r = button.handle_pointer(PointerEvent::Moved([20.0, 20.0]));
        assert!(r.redraw && !r.clicked);
        assert!(button.state().hovered);
        button.handle_pointer(PointerEvent::Pressed([20.0, 20.0]));
        assert!(button.state().pressed);
        assert!(button.handle_pointer(PointerEvent::Released([25.0, 20.0])).clicked);
        assert!(!button.state().pressed);

        // Dragged off before release.
        button.handle_pointer(PointerEvent::Pressed([20.0, 20.0]));
        assert!(!button.handle_pointer(PointerEvent::Released([500.0, 20.0])).clicked);
        // Pressed outside, released inside.
        button.handle_pointer(PointerEvent::Pressed([0.0, 0.0]));
        assert!(!button.handle_pointer(PointerEvent::Released([20.0, 20.0])).clicked);

        button.handle_pointer(PointerEvent::Left);
        assert!(!button.state().hovered);
        // No change, no redraw.
        assert_eq!(
            button.handle_pointer(PointerEvent::Left),
            Response::default()
        );
    }
    #[test]
    fn hover_color_animates() {
        let button = button(font());
        let style = ButtonStyle::default();
        let mut list = DrawList::new();
        button.emit(&mut list, 0.0);
        assert_eq!(button.state().display_color, style.idle);

        button.handle_pointer(PointerEvent::Moved([20.0, 20.0]));
        button.emit(&mut list, 1.0 / 64.0);
        let partway = button.state().display_color;
        assert_ne!(partway, style.idle);
        assert_ne!(partway, style.hovered);
        // Long frame snaps to target.
        button.emit(&mut list, 1.0);
        assert_eq!(button.state().display_color, style.hovered);
        // Background rect plus two glyphs, per emit.
        assert_eq!(list.vertices().len(), 3 * 3 * 4);
    }
    #[test]
    fn menu_selects_row() {
        let menu = Widget::new(
            Rect::new([0.0, 0.0], [80.0, 60.0]),
            WidgetKind::Menu {
                items: vec!["One".into(), "Two".into(), "Three".into()],
                font: font(),
                item_height: 20.0,
                style: ButtonStyle::default(),
            },
        );
        menu.handle_pointer(PointerEvent::Moved([5.0, 25.0]));
        assert_eq!(menu.state().hovered_item, Some(1));
        menu.handle_pointer(PointerEvent::Pressed([5.0, 45.0]));
        let r = menu.handle_pointer(PointerEvent::Released([5.0, 45.0]));
        assert!(r.clicked);
        assert_eq!(r.selected, Some(2));
        menu.handle_pointer(PointerEvent::Moved([5.0, 100.0]));
        assert_eq!(menu.state().hovered_item, None);
    }
    #[test]
    fn container_forwards_and_draws_children() {
        let icon_texture = MockTexture::new([16, 16]);
        let tree = Widget::new(
            Rect::new([0.0, 0.0], [200.0, 200.0]),
            WidgetKind::Container {
                children: vec![
                    Widget::new(
                        Rect::new([0.0, 0.0], [200.0, 200.0]),
                        WidgetKind::Panel {
                            color: Color::BLACK,
                            border_radius: 8.0,
                        },
                    ),
                    button(font()),
                    Widget::new(
                        Rect::new([150.0, 150.0], [16.0, 16.0]),
                        WidgetKind::Icon {
                            texture: icon_texture.clone(),
                            tint: Color::WHITE,
                        },
                    ),
                ],
            },
        );
        tree.handle_pointer(PointerEvent::Pressed([20.0, 20.0]));
        assert!(tree.handle_pointer(PointerEvent::Released([20.0, 20.0])).clicked);

        let mut list = DrawList::new();
        tree.emit(&mut list, 0.0);
        // Panel and button background, then the label, then the icon.
        let batches = list.batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].index_count, 12);
        assert!(Arc::ptr_eq(batches[2].texture.as_ref().unwrap(), &icon_texture));
    }
    #[test]
    fn custom_widgets_get_events() {
        struct Counter(std::sync::atomic::AtomicUsize);
        impl CustomWidget<MockTexture> for Counter {
            fn emit(&self, bounds: Rect, _: &InteractionState, list: &mut DrawList<MockTexture>) {
                list.draw_rect(bounds.position, 1.0, 1.0, Color::WHITE, None, None);
            }
            fn handle_pointer(
                &self,
                _: Rect,
                _: &mut InteractionState,
                _: PointerEvent,
            ) -> Response {
                self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Response {
                    redraw: true,
                    ..Default::default()
                }
            }
        }
        let counter = Arc::new(Counter(0.into()));
        let widget = Widget::new(
            Rect::new([0.0, 0.0], [10.0, 10.0]),
            WidgetKind::Custom(counter.clone()),
        );
        assert!(widget.handle_pointer(PointerEvent::Left).redraw);
        assert_eq!(counter.0.load(std::sync::atomic::Ordering::Relaxed), 1);
        let mut list = DrawList::new();
        widget.emit(&mut list, 0.0);
        assert_eq!(list.vertices().len(), 4);
    }
}
