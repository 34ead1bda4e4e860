use std::sync::Arc;

use super::{Interception, InterceptionStrategy, StrategyKind};
use crate::guard::FaultScope;

/// No trap at all: the call runs on the caller's thread and a fault behaves
/// exactly as it would without a guard, usually by killing the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl InterceptionStrategy for PassThrough {
    const KIND: StrategyKind = StrategyKind::PassThrough;

    fn intercept<F>(&self, call: F, _scope: &Arc<FaultScope>) -> Interception
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        Interception::Returned(call())
    }
}
