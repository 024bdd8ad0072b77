use std::collections::HashMap;

use glam::Vec2;
pub use winit::event::MouseButton;
pub use winit::keyboard::KeyCode;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ButtonPhase: u8 {
        const NONE     = 0;
        const PRESSED  = 1 << 0;
        const HELD     = 1 << 1;
        const RELEASED = 1 << 2;
    }
}

/// Snapshot of keyboard and mouse state for one frame.
///
/// The window runner feeds raw events in; the frame callback reads it by
/// reference; `end_frame` clears the edge-triggered bits and deltas.
#[derive(Default, Debug)]
pub struct InputState {
    keys: HashMap<KeyCode, ButtonPhase>,
    mouse_buttons: HashMap<MouseButton, ButtonPhase>,

    cursor: Option<Vec2>,
    mouse_delta: Vec2,
    scroll_delta: f32,
}

fn press(phase: &mut ButtonPhase) {
    if !phase.contains(ButtonPhase::HELD) {
        *phase |= ButtonPhase::PRESSED | ButtonPhase::HELD;
    }
}

fn release(phase: &mut ButtonPhase) {
    if phase.contains(ButtonPhase::HELD) {
        phase.remove(ButtonPhase::HELD);
        *phase |= ButtonPhase::RELEASED;
    }
}

impl InputState {
    pub fn press_key(&mut self, key: KeyCode) {
        press(self.keys.entry(key).or_insert(ButtonPhase::NONE));
    }

    pub fn release_key(&mut self, key: KeyCode) {
        release(self.keys.entry(key).or_insert(ButtonPhase::NONE));
    }

    pub fn press_mouse(&mut self, button: MouseButton) {
        press(self.mouse_buttons.entry(button).or_insert(ButtonPhase::NONE));
    }

    pub fn release_mouse(&mut self, button: MouseButton) {
        release(self.mouse_buttons.entry(button).or_insert(ButtonPhase::NONE));
    }

    /// Records an absolute cursor position. The first sample only seeds the
    /// position so the initial jump does not count as movement.
    pub fn move_cursor(&mut self, position: Vec2) {
        if let Some(last) = self.cursor {
            self.mouse_delta += position - last;
        }
        self.cursor = Some(position);
    }

    pub fn scroll(&mut self, amount: f32) {
        self.scroll_delta += amount;
    }

    pub fn key_phase(&self, key: KeyCode) -> ButtonPhase {
        self.keys.get(&key).copied().unwrap_or(ButtonPhase::NONE)
    }

    pub fn is_held(&self, key: KeyCode) -> bool {
        self.key_phase(key).contains(ButtonPhase::HELD)
    }

    pub fn just_pressed(&self, key: KeyCode) -> bool {
        self.key_phase(key).contains(ButtonPhase::PRESSED)
    }

    pub fn just_released(&self, key: KeyCode) -> bool {
        self.key_phase(key).contains(ButtonPhase::RELEASED)
    }

    pub fn mouse_held(&self, button: MouseButton) -> bool {
        self.mouse_buttons
            .get(&button)
            .is_some_and(|phase| phase.contains(ButtonPhase::HELD))
    }

    pub fn mouse_just_pressed(&self, button: MouseButton) -> bool {
        self.mouse_buttons
            .get(&button)
            .is_some_and(|phase| phase.contains(ButtonPhase::PRESSED))
    }

    pub fn cursor_position(&self) -> Option<Vec2> {
        self.cursor
    }

    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_delta
    }

    pub fn scroll_delta(&self) -> f32 {
        self.scroll_delta
    }

    /// Drops PRESSED/RELEASED edges and per-frame deltas.
    pub fn end_frame(&mut self) {
        self.keys.retain(|_, phase| {
            *phase &= ButtonPhase::HELD;
            !phase.is_empty()
        });
        self.mouse_buttons.retain(|_, phase| {
            *phase &= ButtonPhase::HELD;
            !phase.is_empty()
        });

        self.mouse_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_lifecycle() {
        let mut input = InputState::default();

        input.press_key(KeyCode::KeyW);
        assert!(input.just_pressed(KeyCode::KeyW));
        assert!(input.is_held(KeyCode::KeyW));

        input.end_frame();
        assert!(!input.just_pressed(KeyCode::KeyW));
        assert!(input.is_held(KeyCode::KeyW));

        // key repeat must not produce a second edge
        input.press_key(KeyCode::KeyW);
        assert!(!input.just_pressed(KeyCode::KeyW));

        input.release_key(KeyCode::KeyW);
        assert!(input.just_released(KeyCode::KeyW));
        assert!(!input.is_held(KeyCode::KeyW));

        input.end_frame();
        assert_eq!(input.key_phase(KeyCode::KeyW), ButtonPhase::NONE);
    }

    #[test]
    fn test_first_cursor_sample_has_no_delta() {
        let mut input = InputState::default();
        input.move_cursor(Vec2::new(100.0, 100.0));
        assert_eq!(input.mouse_delta(), Vec2::ZERO);

        input.move_cursor(Vec2::new(110.0, 95.0));
        input.move_cursor(Vec2::new(115.0, 95.0));
        assert_eq!(input.mouse_delta(), Vec2::new(15.0, -5.0));

        input.end_frame();
        assert_eq!(input.mouse_delta(), Vec2::ZERO);
        assert_eq!(input.cursor_position(), Some(Vec2::new(115.0, 95.0)));
    }

    #[test]
    fn test_mouse_buttons() {
        let mut input = InputState::default();
        input.press_mouse(MouseButton::Left);
        assert!(input.mouse_just_pressed(MouseButton::Left));
        input.end_frame();
        assert!(input.mouse_held(MouseButton::Left));
        input.release_mouse(MouseButton::Left);
        assert!(!input.mouse_held(MouseButton::Left));
    }
}
