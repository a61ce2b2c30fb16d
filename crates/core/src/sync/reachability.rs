use std::sync::atomic::{AtomicBool, Ordering};

/// Network path check run before each cycle.
pub trait Reachability: Send + Sync {
    fn is_reachable(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReachable;

impl Reachability for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }
}

/// Reachability driven by connectivity notifications from the embedding app.
#[derive(Debug)]
pub struct ReachabilityFlag {
    reachable: AtomicBool,
}

impl ReachabilityFlag {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl Default for ReachabilityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Reachability for ReachabilityFlag {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
