pub mod card_binder;
pub mod classifier;
pub mod keywords;
pub mod totp;
pub mod translator;

pub use card_binder::{BindOutcome, CardBinder};
pub use classifier::{evaluate_rules, Classifier, Evaluation, PageSnapshot};
pub use translator::{CachedTranslator, LlmTranslator, Translator};
