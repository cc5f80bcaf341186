//! The set of host capabilities the content controller runs on.

use crate::encyclopedia::Encyclopedia;
use crate::model::LanguageModel;
use crate::overlay::OverlayHost;
use crate::relay::HostRelay;
use crate::scheduler::Scheduler;
use crate::tree::DocumentTree;

/// Binds one implementation of every capability together.
///
/// The browser crate provides the `web_sys` binding; tests bind the
/// in-memory tree, the local runtime and fakes.
pub trait Platform: 'static {
    type Tree: DocumentTree;
    type Scheduler: Scheduler;
    type Host: OverlayHost<<Self::Tree as DocumentTree>::Node>;
    type Model: LanguageModel;
    type Encyclopedia: Encyclopedia;
    type Relay: HostRelay;
}

/// Node handle of a platform's document tree.
pub type NodeOf<P> = <<P as Platform>::Tree as DocumentTree>::Node;

/// Live handles to a platform's capabilities.
pub struct Services<P: Platform> {
    pub tree: P::Tree,
    pub scheduler: P::Scheduler,
    pub host: P::Host,
    pub model: P::Model,
    pub encyclopedia: P::Encyclopedia,
    pub relay: P::Relay,
}

impl<P: Platform> Clone for Services<P> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            scheduler: self.scheduler.clone(),
            host: self.host.clone(),
            model: self.model.clone(),
            encyclopedia: self.encyclopedia.clone(),
            relay: self.relay.clone(),
        }
    }
}
