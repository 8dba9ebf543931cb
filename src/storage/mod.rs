//! 持久化层
//!
//! - `store`: SQLite 账号库，唯一事实来源
//! - `export`: 从账号库派生的文本导出与同步
//! - `migrate`: 把旧版分类文件一次性导入账号库

pub mod export;
pub mod migrate;
pub mod store;

pub use export::{ExportQuery, Exporter, SyncReport, EXPORT_FIELDS};
pub use migrate::{migrate_legacy_files, MigrationReport};
pub use store::Store;
