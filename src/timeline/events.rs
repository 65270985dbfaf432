//! # Timeline event types and the message they carry.
//!
//! Every timeline event is published through the dispatcher with a
//! [`TimelineMessage`] as its message. Handlers downcast it with
//! `event.message::<TimelineMessage>()`.
//!
//! | Event           | Claim means                         | Editable fields          |
//! |-----------------|-------------------------------------|--------------------------|
//! | [`START`]       | veto: the timeline is never created | none                     |
//! | [`ENDING`]      | objection: end postponed (`InUse`)  | none                     |
//! | [`ABORTING`]    | objection: abort postponed          | none                     |
//! | [`ENDED`]       | ignored                             | none                     |
//! | [`ABORTED`]     | ignored                             | none                     |
//! | [`TITLE`]       | veto: title unchanged               | `title`                  |
//! | [`EXTENT`]      | ignored                             | none                     |
//! | [`PROGRESS`]    | ignored                             | none                     |

use std::sync::Arc;

use crate::registry::{Priority, Type};

use super::types::{Progress, State, TimelineRef, TimelineType, Unit};

pub const START: Type = Type(0x544c_0001);
pub const ENDING: Type = Type(0x544c_0002);
pub const ENDED: Type = Type(0x544c_0003);
pub const ABORTING: Type = Type(0x544c_0004);
pub const ABORTED: Type = Type(0x544c_0005);
pub const TITLE: Type = Type(0x544c_0006);
pub const EXTENT: Type = Type(0x544c_0007);
pub const PROGRESS: Type = Type(0x544c_0008);

/// Every timeline event type, in lifecycle order.
pub const ALL: [Type; 8] = [START, ENDING, ENDED, ABORTING, ABORTED, TITLE, EXTENT, PROGRESS];

/// Returns a short label for a timeline event type.
pub fn label(ty: Type) -> &'static str {
    match ty {
        START => "start",
        ENDING => "ending",
        ENDED => "ended",
        ABORTING => "aborting",
        ABORTED => "aborted",
        TITLE => "title",
        EXTENT => "extent",
        PROGRESS => "progress",
        _ => "unknown",
    }
}

/// Snapshot of a timeline, published with every timeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineMessage {
    pub reference: TimelineRef,
    pub ty: TimelineType,
    pub parent: Option<TimelineRef>,
    pub priority: Priority,
    pub state: State,
    pub start: f64,
    pub end: f64,
    pub progress: f64,
    pub unit: Unit,
    pub title: Option<Arc<str>>,
    /// Set on abort events when the caller gave a reason.
    pub reason: Option<Arc<str>>,
}

impl TimelineMessage {
    pub fn extent(&self) -> Progress {
        Progress {
            start: self.start,
            end: self.end,
            progress: self.progress,
            unit: self.unit,
        }
    }
}
