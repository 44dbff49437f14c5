//! Progress core: message protocol, progress ledger and update router.
//!
//! Everything in this crate is synchronous and free of I/O. The socket side
//! lives in `progress_engine`.
mod emitter;
mod key;
mod ledger;
mod protocol;
mod router;
mod stage;

pub use emitter::{Classified, EventEmitter, Handler, HandlerId};
pub use key::{design_key, item_key_for_file};
pub use ledger::{
    CompletedDesign, Completion, LedgerError, ProgressLedger, ProgressRecord, StageEvent,
};
pub use protocol::{DesignReady, ImageUpdate, InboundMessage, OutboundMessage, ProtocolError};
pub use router::{
    Clock, DedupKey, Diagnostic, DiagnosticKind, RouterEvent, RouterEventKind, RouterStats,
    StageAdvanced, UpdateRouter,
};
pub use stage::{stage_color, stage_label, DEFAULT_STAGE_COLOR, DEFAULT_STAGE_LABEL};
