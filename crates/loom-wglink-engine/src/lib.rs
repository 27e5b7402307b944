// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The fact exchange daemon's engine.
//!
//! Packets flow reader → chunker → processor, and each processed chunk fans
//! out to the broadcaster and the reconciler. Every stage is a task joined
//! by bounded channels; closing a stage's input is what stops it.

pub mod broadcast;
pub mod chunker;
pub mod context;
pub mod device;
pub mod environment;
pub mod error;
pub mod knowledge;
pub mod local_facts;
pub mod memory;
pub mod peer_state;
pub mod processor;
pub mod reader;
pub mod reconcile;
pub mod server;
pub mod timing;
pub mod wg_command;

pub use broadcast::{Broadcaster, PacketSink, UdpSink};
pub use context::{FactChunk, LinkConfig, LinkContext, ReceivedChunk, ReceivedFact};
pub use device::SharedDevice;
pub use environment::{ensure_link_local, interface_index, SystemEnvironment};
pub use error::{EngineError, Result};
pub use knowledge::PeerKnowledgeSet;
pub use memory::{MemoryDevice, MemoryEnvironment};
pub use peer_state::{PeerConfigSet, PeerConfigState};
pub use processor::FactProcessor;
pub use reader::{unpack_packet, PacketError};
pub use reconcile::Reconciler;
pub use server::{LinkServer, ServerHandle};
pub use wg_command::WgCommandDevice;
