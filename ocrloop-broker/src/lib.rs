//! Resource broker for ocrloop
//!
//! A [`Broker`] sits on one base connection and lets either side register
//! sub-services under numeric ids, hand those ids to the counterpart, and
//! dial ids the counterpart registered. Everything a broker hands out is a
//! [`Resource`] that must be released explicitly.

pub mod broker;
pub mod client;
pub mod control;
pub mod error;
pub mod resource;
pub mod server;
mod table;

pub use broker::{Broker, BrokerStats, DispenseGate, Dispensed};
pub use client::{Backing, ClientConn};
pub use control::CONTROL_SERVICE;
pub use error::{BrokerError, BrokerResult, CloseErrors};
pub use ocrloop_ipc::{Fault, FaultKind, ServiceId};
pub use resource::{close_all, Closer, Resource, ResourceSet};
pub use server::{decode_request, encode_response, unknown_method, Server, ServiceHandler};
