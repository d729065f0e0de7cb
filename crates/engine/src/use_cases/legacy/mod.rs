pub mod action_select;
pub mod dialogue;

pub use action_select::LegacyActionSelect;
pub use dialogue::LegacyDialogue;
