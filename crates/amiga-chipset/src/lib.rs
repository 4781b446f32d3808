//! Cycle-accurate OCS chipset core.
//!
//! The Amiga's custom chips are dozens of coupled state machines sharing one
//! chip-RAM bus. This crate models that scheduling problem directly: a
//! priority-ordered event scheduler advances the machines to an arbitrary
//! master-clock cycle, per-line slot-allocation tables decide bus ownership
//! ahead of time, and the disk controller, Copper, Blitter, and CIAs run as
//! event-driven participants.
//!
//! The 68k CPU is an external collaborator: it calls
//! [`Amiga::execute_until`](amiga::Amiga::execute_until) before touching a
//! custom register and polls [`Amiga::int_level`](amiga::Amiga::int_level)
//! between instructions. Pixel generation, audio output, and host I/O live
//! outside this crate as well.

pub mod agnus;
pub mod amiga;
pub mod beam;
pub mod blitter;
pub mod cia;
pub mod config;
pub mod copper;
pub mod error;
pub mod inspect;
pub mod memory;
pub mod messages;
pub mod paula;
pub mod regs;
pub mod scheduler;
pub mod snapshot;

pub use amiga::Amiga;
pub use beam::{Beam, Cycle, Frame, HPOS_CNT, HPOS_MAX, NEVER};
pub use config::{AmigaConfig, DriveConfig};
pub use error::Error;
pub use messages::Message;
pub use scheduler::{EventId, EventScheduler, SecSlot, Slot};

// Re-export the support crates so hosts see one surface.
pub use drive_amiga_floppy;
pub use format_adf;
