//! ブラウザセッション管理
//!
//! - `Locator`: 要素の指定
//! - `ChromeLauncher`: chromiumoxide によるセッション生成
//! - `release_session`: 決められた順序での解放

mod chrome;
mod locator;
mod session;

pub use chrome::{ChromeLauncher, ChromePage, ChromeSession};
pub use locator::Locator;
pub use session::{
    release_session, LaunchOptions, ACCEPT_LANGUAGE, DESKTOP_USER_AGENT, DESKTOP_VIEWPORT,
    LAUNCH_ARGS, LOCALE,
};
