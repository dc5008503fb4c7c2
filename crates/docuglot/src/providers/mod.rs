//! Collaborator boundaries: durable blob storage and translation providers

pub mod blob_store;
pub mod translator;

pub use blob_store::{BlobStore, FsBlobStore};
pub use translator::{
    EchoTranslator, HttpTranslator, TranslateOptions, TranslationService, Translator,
};
