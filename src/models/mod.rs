pub mod account;
pub mod card;
pub mod link_check;
pub mod loaders;
pub mod proxy;

pub use account::{now_timestamp, Account, AccountStatus, Verdict};
pub use card::Card;
pub use link_check::{LinkCheck, LinkOutcome};
pub use loaders::{load_accounts, load_cards, load_proxies, LoadReport};
pub use proxy::{Proxy, ProxyScheme};
