//! Calibration records read from the device.
//!
//! Tables are filled once while the device initializes and are read-only
//! afterwards.

/// Pinhole intrinsics with distortion coefficients of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Intrinsics {
    pub width: u16,
    pub height: u16,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Distortion model id as reported by the device.
    pub model: u8,
    pub coeffs: [f64; 5],
}

/// Intrinsics of one IMU sensor (accelerometer or gyroscope).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuIntrinsics {
    /// Scale and misalignment, row-major.
    pub scale: [[f64; 3]; 3],
    pub drift: [f64; 3],
    pub noise: [f64; 3],
    pub bias: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionIntrinsics {
    pub accel: ImuIntrinsics,
    pub gyro: ImuIntrinsics,
}

/// Rigid transform between two sensor frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    /// Row-major rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// Translation in millimeters.
    pub translation: [f64; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Inverse transform: R' = Rᵀ, t' = -Rᵀ·t.
    pub fn inverse(&self) -> Self {
        let r = &self.rotation;
        let mut rotation = [[0.0; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = r[j][i];
            }
        }
        let t = &self.translation;
        let mut translation = [0.0; 3];
        for (i, v) in translation.iter_mut().enumerate() {
            *v = -(rotation[i][0] * t[0] + rotation[i][1] * t[1] + rotation[i][2] * t[2]);
        }
        Self {
            rotation,
            translation,
        }
    }

    /// Apply `other` first, then `self`.
    pub fn compose(&self, other: &Extrinsics) -> Self {
        let a = &self.rotation;
        let b = &other.rotation;
        let mut rotation = [[0.0; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (0..3).map(|k| a[i][k] * b[k][j]).sum();
            }
        }
        let mut translation = self.translation;
        for (i, v) in translation.iter_mut().enumerate() {
            *v += (0..3).map(|k| a[i][k] * other.translation[k]).sum::<f64>();
        }
        Self {
            rotation,
            translation,
        }
    }

    pub fn approx_eq(&self, other: &Extrinsics, eps: f64) -> bool {
        let rot = self
            .rotation
            .iter()
            .flatten()
            .zip(other.rotation.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps);
        let trans = self
            .translation
            .iter()
            .zip(other.translation.iter())
            .all(|(a, b)| (a - b).abs() <= eps);
        rot && trans
    }
}

/// Image calibration block: both camera intrinsics and right→left extrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImgParams {
    pub in_left: Intrinsics,
    pub in_right: Intrinsics,
    pub ex_right_to_left: Extrinsics,
}

/// IMU calibration block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuParams {
    pub in_accel: ImuIntrinsics,
    pub in_gyro: ImuIntrinsics,
    pub ex_left_to_imu: Extrinsics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation_z(deg: f64) -> [[f64; 3]; 3] {
        let (s, c) = deg.to_radians().sin_cos();
        [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let ex = Extrinsics {
            rotation: rotation_z(30.0),
            translation: [-120.0, 0.5, 2.0],
        };
        let round = ex.compose(&ex.inverse());
        assert!(round.approx_eq(&Extrinsics::identity(), 1e-9));
        let round = ex.inverse().compose(&ex);
        assert!(round.approx_eq(&Extrinsics::identity(), 1e-9));
    }

    #[test]
    fn test_inverse_of_pure_translation() {
        let ex = Extrinsics {
            rotation: Extrinsics::identity().rotation,
            translation: [1.0, 2.0, 3.0],
        };
        assert_eq!(ex.inverse().translation, [-1.0, -2.0, -3.0]);
    }
}
