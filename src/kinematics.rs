//! Kinematics collaborator interface.
//!
//! Residual functions for articulated systems map a joint-angle vector to a
//! set of named poses. The mapping itself lives outside this crate (URDF or
//! otherwise); the trait here is the seam the optimizer consumes, and
//! [`IdentityModel`] is the trivial implementer used when the state being
//! optimized is a single free pose.

use crate::core::{OrbitError, OrbitResult};
use crate::lie::{GroupVariant, ManifoldTensor, VectorBatch};
use nalgebra::DVector;
use std::collections::HashMap;

/// Forward-kinematics map from a joint vector to named poses.
pub trait KinematicsModel {
    /// Poses of the model's links for the given joint configuration.
    fn forward_kinematics(
        &self,
        joints: &DVector<f64>,
    ) -> OrbitResult<HashMap<String, ManifoldTensor>>;

    /// Number of degrees of freedom of the joint vector.
    fn dim(&self) -> usize;
}

/// The trivial model: the joint vector is an se3 tangent and the single
/// output pose `"state"` is its exponential.
#[derive(Debug, Clone, Default)]
pub struct IdentityModel;

impl IdentityModel {
    pub fn new() -> Self {
        IdentityModel
    }
}

impl KinematicsModel for IdentityModel {
    fn forward_kinematics(
        &self,
        joints: &DVector<f64>,
    ) -> OrbitResult<HashMap<String, ManifoldTensor>> {
        if joints.len() != self.dim() {
            return Err(OrbitError::Shape(format!(
                "identity model expects {} joint values, got {}",
                self.dim(),
                joints.len()
            )));
        }
        let tangent = VectorBatch::from_raw(1, 6, joints.iter().copied().collect())?;
        let pose = ManifoldTensor::exp(GroupVariant::SE3, &tangent, None)?;
        Ok(HashMap::from([("state".to_string(), pose)]))
    }

    fn dim(&self) -> usize {
        6
    }
}
