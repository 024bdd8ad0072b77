use std::f32::consts::{FRAC_PI_2, PI, TAU};

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::input::{InputState, KeyCode, MouseButton};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        fov: f32,
        aspect_ratio: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Self::Perspective {
            fov: 65.0f32.to_radians(),
            aspect_ratio: 4.0 / 3.0,
            near: 0.5,
            far: 100.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_degrees: f32, aspect_ratio: f32, near: f32, far: f32) -> Self {
        Self::Perspective {
            fov: fov_degrees.to_radians(),
            aspect_ratio,
            near,
            far,
        }
    }

    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        Self::Orthographic {
            left,
            right,
            bottom,
            top,
            near,
            far,
        }
    }

    /// Computes the "Projection Matrix" (View -> Clip), OpenGL depth range
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Self::Perspective {
                fov,
                aspect_ratio,
                near,
                far,
            } => Mat4::perspective_rh_gl(fov, aspect_ratio, near, far),
            Self::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh_gl(left, right, bottom, top, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match *self {
            Self::Perspective { near, .. } | Self::Orthographic { near, .. } => near,
        }
    }

    pub fn far(&self) -> f32 {
        match *self {
            Self::Perspective { far, .. } | Self::Orthographic { far, .. } => far,
        }
    }
}

/// Spherical-angle fly camera.
///
/// `phi` rotates around +Y (PI looks down -Z), `theta` is the inclination and
/// stays strictly inside (-PI/2, PI/2).
#[derive(Clone, Debug)]
pub struct FirstPersonCamera {
    pub position: Vec3,
    phi: f32,
    theta: f32,
    direction: Vec3,

    pub speed_forward: f32,
    pub speed_right: f32,
    pub move_speed: f32,
    pub mouse_sensitivity: f32,
    pub projection: Projection,
}

impl Default for FirstPersonCamera {
    fn default() -> Self {
        let mut camera = Self {
            position: Vec3::ZERO,
            phi: PI,
            theta: 0.0,
            direction: Vec3::NEG_Z,
            speed_forward: 0.0,
            speed_right: 0.0,
            move_speed: 3.0,
            mouse_sensitivity: 1.0 / 300.0,
            projection: Projection::default(),
        };
        camera.update_direction();
        camera
    }
}

impl FirstPersonCamera {
    pub fn new(projection: Projection) -> Self {
        Self {
            projection,
            ..Default::default()
        }
    }

    pub fn phi(&self) -> f32 {
        self.phi
    }

    pub fn theta(&self) -> f32 {
        self.theta
    }

    pub fn set_phi(&mut self, phi: f32) {
        self.phi = phi;
        self.update_direction();
    }

    pub fn set_theta(&mut self, theta: f32) {
        self.theta = theta;
        self.update_direction();
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction.normalize();
        self.theta = self
            .direction
            .y
            .atan2((self.direction.x * self.direction.x + self.direction.z * self.direction.z).sqrt());
        self.phi = self.direction.x.atan2(self.direction.z);
    }

    /// Points the camera at `center` from its current position.
    pub fn set_center(&mut self, center: Vec3) {
        self.set_direction(center - self.position);
    }

    pub fn right(&self) -> Vec3 {
        Vec3::new((self.phi - FRAC_PI_2).sin(), 0.0, (self.phi - FRAC_PI_2).cos()).normalize()
    }

    pub fn up(&self) -> Vec3 {
        self.right().cross(self.direction).normalize()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.direction, self.up())
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// Reads WASD for movement and left-drag for looking around.
    pub fn apply_input(&mut self, input: &InputState) {
        let axis = |positive: KeyCode, negative: KeyCode| {
            (input.is_held(positive) as i32 - input.is_held(negative) as i32) as f32
        };
        self.speed_forward = axis(KeyCode::KeyW, KeyCode::KeyS) * self.move_speed;
        self.speed_right = axis(KeyCode::KeyD, KeyCode::KeyA) * self.move_speed;

        if input.mouse_held(MouseButton::Left) {
            let delta = input.mouse_delta();
            self.rotate(delta.y, delta.x);
        }
    }

    /// Mouse look; deltas are in pixels.
    pub fn rotate(&mut self, d_theta: f32, d_phi: f32) {
        self.theta -= d_theta * self.mouse_sensitivity;
        self.phi -= d_phi * self.mouse_sensitivity;
        self.update_direction();
    }

    pub fn update(&mut self, dt: f32) {
        self.position += self.direction * dt * self.speed_forward;
        self.position += self.right() * dt * self.speed_right;
    }

    fn update_direction(&mut self) {
        self.phi %= TAU;
        let limit = FRAC_PI_2 - 0.001;
        self.theta = self.theta.clamp(-limit, limit);

        self.direction = Vec3::new(
            self.theta.cos() * self.phi.sin(),
            self.theta.sin(),
            self.phi.cos() * self.theta.cos(),
        )
        .normalize();
    }
}

/// Look-at camera that keeps a fixed target, used for the shadow-map light.
#[derive(Clone, Debug)]
pub struct LookAtCamera {
    pub position: Vec3,
    pub center: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl LookAtCamera {
    pub fn new(position: Vec3, center: Vec3, projection: Projection) -> Self {
        Self {
            position,
            center,
            up: Vec3::Y,
            projection,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.center, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Keeps the same offset to the followed point while it moves.
    pub fn follow(&mut self, target: Vec3, offset: Vec3) {
        self.center = target;
        self.position = target + offset;
    }
}

/// Mouse-drag rotation around the view's up and right axes.
#[derive(Clone, Debug)]
pub struct Turntable {
    rotation: Quat,
    drag_active: bool,
    pub sensitivity: f32,
}

impl Default for Turntable {
    fn default() -> Self {
        Self {
            rotation: Quat::IDENTITY,
            drag_active: false,
            sensitivity: 0.01,
        }
    }
}

impl Turntable {
    pub fn drag_active(&self) -> bool {
        self.drag_active
    }

    pub fn set_drag_active(&mut self, active: bool) {
        self.drag_active = active;
    }

    pub fn drag_by(&mut self, dx: f32, dy: f32, view: &Mat4) {
        if !self.drag_active {
            return;
        }
        let inverse_view = view.inverse();
        let up = inverse_view.transform_vector3(Vec3::Y).normalize_or(Vec3::Y);
        let right = inverse_view.transform_vector3(Vec3::X).normalize_or(Vec3::X);

        let yaw = Quat::from_axis_angle(up, dx * self.sensitivity);
        let pitch = Quat::from_axis_angle(right, dy * self.sensitivity);
        self.rotation = (yaw * pitch * self.rotation).normalize();
    }

    /// Left button toggles the drag, cursor motion rotates.
    pub fn apply_input(&mut self, input: &InputState, view: &Mat4) {
        self.set_drag_active(input.mouse_held(MouseButton::Left));
        let delta = input.mouse_delta();
        self.drag_by(delta.x, delta.y, view);
    }

    pub fn rotation_matrix(&self) -> Mat4 {
        Mat4::from_quat(self.rotation)
    }

    pub fn rotate_point(&self, point: Vec4) -> Vec4 {
        self.rotation_matrix() * point
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_default_camera_looks_down_negative_z() {
        let camera = FirstPersonCamera::default();
        assert!(approx(camera.direction(), Vec3::NEG_Z));
        assert!(approx(camera.up(), Vec3::Y));
    }

    #[test]
    fn test_theta_is_clamped_below_the_pole() {
        let mut camera = FirstPersonCamera::default();
        camera.set_theta(10.0);
        assert!(camera.theta() < FRAC_PI_2);
        assert!((camera.theta() - (FRAC_PI_2 - 0.001)).abs() < 1e-6);

        camera.set_theta(-10.0);
        assert!((camera.theta() + (FRAC_PI_2 - 0.001)).abs() < 1e-6);
    }

    #[test]
    fn test_update_moves_along_view_direction() {
        let mut camera = FirstPersonCamera::default();
        camera.speed_forward = 3.0;
        camera.update(2.0);
        assert!(approx(camera.position, Vec3::new(0.0, 0.0, -6.0)));
    }

    #[test]
    fn test_set_center_round_trips_through_angles() {
        let mut camera = FirstPersonCamera::default();
        camera.position = Vec3::new(0.0, 0.0, 5.0);
        camera.set_center(Vec3::ZERO);
        assert!(approx(camera.direction(), Vec3::NEG_Z));

        camera.set_center(Vec3::new(5.0, 0.0, 5.0));
        assert!(approx(camera.direction(), Vec3::X));
    }

    #[test]
    fn test_wasd_sets_speeds() {
        let mut input = InputState::default();
        input.press_key(KeyCode::KeyW);
        input.press_key(KeyCode::KeyA);

        let mut camera = FirstPersonCamera::default();
        camera.apply_input(&input);
        assert_eq!(camera.speed_forward, 3.0);
        assert_eq!(camera.speed_right, -3.0);
    }

    #[test]
    fn test_turntable_ignores_motion_without_drag() {
        let mut turntable = Turntable::default();
        turntable.drag_by(50.0, 20.0, &Mat4::IDENTITY);
        assert_eq!(turntable.rotation_matrix(), Mat4::IDENTITY);

        turntable.set_drag_active(true);
        turntable.drag_by(50.0, 0.0, &Mat4::IDENTITY);
        let rotated = turntable.rotate_point(Vec4::new(0.0, 0.0, 1.0, 0.0));
        assert!((rotated.truncate().length() - 1.0).abs() < 1e-5);
        assert!(rotated.x > 0.0);
    }

    #[test]
    fn test_orthographic_bounds_are_reported() {
        let ortho = Projection::orthographic(-10.0, 10.0, -10.0, 10.0, 0.0, 30.0);
        assert_eq!(ortho.near(), 0.0);
        assert_eq!(ortho.far(), 30.0);
    }
}
