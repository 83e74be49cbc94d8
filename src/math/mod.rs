//! Numeric helpers shared by aggregation, distillation and reporting:
//!
//! - [`norms`]: L2 norms and distances over flat slices
//! - [`divergence`]: temperature softmax and KL-divergence matching

pub mod divergence;
pub mod norms;

pub use divergence::{kl_div, softmax, softmax_rows, symmetric_kl};
pub use norms::{l2_distance, l2_norm, l2_norm_sq};
