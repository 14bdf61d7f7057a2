//! Shared types for the popline voice line.
//!
//! Every other crate in the workspace takes its cross-cutting vocabulary from
//! here: conversation history turns, tool invocations, transcripts, audio
//! frames and the facility records the agent reasons over. Nothing in this
//! crate performs I/O.

pub mod audio;
pub mod conversation;
pub mod facility;

pub use audio::{AudioEncoding, AudioFrame, TELEPHONY_SAMPLE_RATE};
pub use conversation::{
    FillerContext, HistoryTurn, Role, ToolCall, ToolResult, Transcript, TurnContent,
};
pub use facility::{
    format_rent_price, Facility, Inquiry, NewFacility, NewInquiry, NewReservation, NewSection,
    Reservation, Section, SectionFilter, SectionStatus,
};
