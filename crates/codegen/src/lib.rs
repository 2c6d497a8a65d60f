//! Script generation for opsmith.
//!
//! Three layers: the prompt assembler composes envelopes per task kind, the
//! template catalog synthesizes scripts offline, and the generator facade
//! orchestrates provider calls with the template as the fallback path.

pub mod generator;
pub mod prompt;
pub mod template;

pub use generator::{
    derive_filename, extract_code_block, extract_documentation, post_process, CodeGenerator,
    GenerationConfig,
};
pub use prompt::PromptAssembler;
pub use template::TemplateCatalog;
