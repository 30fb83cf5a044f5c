//! Core types for the anagram pipeline.

pub mod run;
pub mod pair;
pub mod message;

pub use run::{RunId, RunParams, RunManifest, RunHandle, RunStatus, Stage};
pub use pair::{AnagramPair, AnagramGroup, anagram_key};
pub use message::{
    Topic, TopicMessage, decode, encode,
    ReadRequest, MapRequest, ShuffleRequest, ReduceRequest, CleanRequest, CompletionEvent,
};
