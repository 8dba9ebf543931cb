//! 基础设施层
//!
//! 页面能力抽象与 chromiumoxide 实现

pub mod cdp_page;
pub mod js_executor;
pub mod page;
#[cfg(test)]
pub(crate) mod testing;

pub use cdp_page::CdpPage;
pub use js_executor::JsExecutor;
pub use page::{
    frame_tree, wait_for_any, wait_for_selector, FrameInfo, FramePath, FrameSnapshot, PageHandle,
};
