// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod delivery;
pub mod event_bus;
pub mod human_interaction;
pub mod llm;
pub mod manifest_parser;
pub mod repositories;

pub use delivery::{DeliveryChannel, MessageDispatcher, OutboundMessage, TracingDeliveryChannel};
pub use event_bus::EventBus;
pub use human_interaction::{HumanInteractionCoordinator, NewInteraction, PendingInteraction};
pub use manifest_parser::{Manifest, ManifestError, ManifestParser};
pub use repositories::{
    InMemoryExecutionStore, InMemoryOrganizationProvider, InMemoryTemplateProvider,
};
