/*
 *  lib.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  Keeps every button and dial on a control surface in step with one
 *  local bridge process, using one shared refresh timer
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

pub mod artwork;
pub mod config;
pub mod coordinator;
pub mod deutils;
pub mod error;
pub mod host;
pub mod httprpc;
pub mod mock;
pub mod registry;
pub mod scheduler;
pub mod states;
pub mod traits;
pub mod widget;

pub use artwork::{DataUri, HttpImageTransport, ImageFetchPipeline};
pub use coordinator::{Coordinator, Credentials, DeckEvent, DeckHandle, DeckStatus, GlobalSettings, PresentationUpdate};
pub use error::{BridgeError, ImageFetchError};
pub use httprpc::BridgeClient;
pub use states::StateSnapshot;
pub use traits::{Bridge, ImageTransport};
pub use widget::{ImageKey, InputEvent, WidgetId, WidgetKind, WidgetSettings};
