//! Controller for BYOH instances
//!
//! This module contains the reconciliation pass and the kube-runtime
//! controller that decides when a pass happens. The pass follows the
//! observe-diff-act loop; the controller maps every trigger onto the single
//! tracking ConfigMap so exactly one pass is in flight at a time.

mod instances;
mod runner;

pub use instances::{
    compute_plan, execute_plan, reconcile, Context, ContextBuilder, KubeMemberLister,
    MemberLister, PassSummary,
};
pub use runner::{error_policy, reconcile_tracking, run};
