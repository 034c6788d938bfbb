use glam::Vec2;
use std::collections::HashSet;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Polled keyboard/cursor state, fed from the window event stream and read
/// by actor updates. Scroll accumulates over the run; `just_pressed` holds
/// for one frame only.
#[derive(Debug, Default)]
pub struct InputState {
    pressed: HashSet<KeyCode>,
    just_pressed: HashSet<KeyCode>,
    cursor_position: Vec2,
    scroll: Vec2,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => {
                            if self.pressed.insert(code) {
                                self.just_pressed.insert(code);
                            }
                        }
                        ElementState::Released => {
                            self.pressed.remove(&code);
                        }
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor_position = Vec2::new(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let offset = match delta {
                    MouseScrollDelta::LineDelta(x, y) => Vec2::new(*x, *y),
                    MouseScrollDelta::PixelDelta(position) => {
                        Vec2::new(position.x as f32, position.y as f32)
                    }
                };
                self.scroll += offset;
            }
            _ => {}
        }
    }

    pub fn pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }

    pub fn just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed.contains(&key)
    }

    pub fn cursor_position(&self) -> Vec2 {
        self.cursor_position
    }

    pub fn scroll(&self) -> Vec2 {
        self.scroll
    }

    /// Called once per frame after update/render so edge-triggered keys fire
    /// exactly once.
    pub fn end_frame(&mut self) {
        self.just_pressed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(input: &mut InputState, code: KeyCode, state: ElementState) {
        // Drive the state machine directly; winit's KeyEvent cannot be
        // constructed outside the event loop.
        match state {
            ElementState::Pressed => {
                if input.pressed.insert(code) {
                    input.just_pressed.insert(code);
                }
            }
            ElementState::Released => {
                input.pressed.remove(&code);
            }
        }
    }

    #[test]
    fn just_pressed_lasts_one_frame() {
        let mut input = InputState::new();
        press(&mut input, KeyCode::Enter, ElementState::Pressed);
        assert!(input.pressed(KeyCode::Enter));
        assert!(input.just_pressed(KeyCode::Enter));

        input.end_frame();
        assert!(input.pressed(KeyCode::Enter));
        assert!(!input.just_pressed(KeyCode::Enter));
    }

    #[test]
    fn holding_a_key_does_not_retrigger() {
        let mut input = InputState::new();
        press(&mut input, KeyCode::Space, ElementState::Pressed);
        input.end_frame();
        press(&mut input, KeyCode::Space, ElementState::Pressed);
        assert!(!input.just_pressed(KeyCode::Space));

        press(&mut input, KeyCode::Space, ElementState::Released);
        press(&mut input, KeyCode::Space, ElementState::Pressed);
        assert!(input.just_pressed(KeyCode::Space));
    }
}
