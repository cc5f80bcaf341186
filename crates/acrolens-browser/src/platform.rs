//! The web binding of every engine capability.

use acrolens_common::{ChatCompletionsModel, WikipediaClient};
use acrolens_core::{Platform, Services};
use web_sys::Document;

use crate::dom::DomTree;
use crate::prompt_api::{BrowserModel, PromptApiModel};
use crate::relay::RuntimeRelay;
use crate::scheduler::BrowserScheduler;
use crate::surface::ShadowOverlayHost;

pub struct BrowserPlatform;

impl Platform for BrowserPlatform {
    type Tree = DomTree;
    type Scheduler = BrowserScheduler;
    type Host = ShadowOverlayHost;
    type Model = BrowserModel;
    type Encyclopedia = WikipediaClient;
    type Relay = RuntimeRelay;
}

/// Services for `document`, talking to the public endpoints.
pub fn browser_services(document: Document) -> Services<BrowserPlatform> {
    Services {
        tree: DomTree::new(document.clone()),
        scheduler: BrowserScheduler::new(),
        host: ShadowOverlayHost::new(document),
        model: BrowserModel::new(PromptApiModel::new(), ChatCompletionsModel::default()),
        encyclopedia: WikipediaClient::default(),
        relay: RuntimeRelay::new(),
    }
}
