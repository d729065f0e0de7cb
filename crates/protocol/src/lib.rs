//! Wire types shared by the narrative runtime engine and its clients.

pub mod requests;
pub mod responses;

pub use requests::{
    AbortRequest, GenerationResultData, LegacyActionSelectRequest, LegacyDialogueRequest,
    ResumeInput, ResumeRequest, StartRequest,
};

pub use responses::{
    CallbackContextData, ChoiceOfferData, DialogueLineData, GenerationKind, GenerationRequestData,
    LegacyActionSelectResponse, LegacyDialogueResponse, MigrationStatusResponse,
    NarrativeResponse, OfferedChoiceData,
};
