//! 代理池
//!
//! 账号自带代理时优先使用；否则租用当前占用最少的池内代理。
//! 池内代理数少于并发数时会出现共享，只告警一次。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::warn;

use crate::models::Proxy;

/// 一次代理租约
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLease {
    pub proxy: Proxy,
    /// 池内下标；账号自带代理时为 `None`
    slot: Option<usize>,
}

pub struct ProxyPool {
    proxies: Vec<Proxy>,
    in_use: Mutex<Vec<usize>>,
    shared_warned: AtomicBool,
}

impl ProxyPool {
    pub fn new(proxies: Vec<Proxy>) -> Self {
        let in_use = Mutex::new(vec![0; proxies.len()]);
        Self {
            proxies,
            in_use,
            shared_warned: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// 为账号选代理；池为空且账号没有代理时返回 `None`
    pub fn lease(&self, explicit: Option<&str>) -> Option<ProxyLease> {
        if let Some(raw) = explicit.filter(|s| !s.trim().is_empty()) {
            match raw.parse::<Proxy>() {
                Ok(proxy) => return Some(ProxyLease { proxy, slot: None }),
                Err(_) => warn!("⚠️ 账号代理格式无效，改用代理池: {}", raw),
            }
        }

        let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        let (slot, count) = in_use
            .iter_mut()
            .enumerate()
            .min_by_key(|(idx, count)| (**count, *idx))?;
        if *count > 0 && !self.shared_warned.swap(true, Ordering::Relaxed) {
            warn!(
                "⚠️ 代理数量 ({}) 少于并发数，代理将被多个账号共享",
                self.proxies.len()
            );
        }
        *count += 1;
        Some(ProxyLease {
            proxy: self.proxies[slot].clone(),
            slot: Some(slot),
        })
    }

    pub fn release(&self, lease: ProxyLease) {
        if let Some(slot) = lease.slot {
            let mut in_use = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(count) = in_use.get_mut(slot) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub fn shared(&self) -> bool {
        self.shared_warned.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> ProxyPool {
        ProxyPool::new(
            (0..n)
                .map(|i| format!("http://10.0.0.{}:8080", i + 1).parse().unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_least_used_proxy_is_leased() {
        let pool = pool(2);
        let a = pool.lease(None).unwrap();
        let b = pool.lease(None).unwrap();
        assert_ne!(a.proxy, b.proxy);
        assert!(!pool.shared());

        pool.release(a.clone());
        let c = pool.lease(None).unwrap();
        assert_eq!(c.proxy, a.proxy);
    }

    #[test]
    fn test_sharing_only_when_pool_is_exhausted() {
        let pool = pool(1);
        let _a = pool.lease(None).unwrap();
        assert!(!pool.shared());
        let b = pool.lease(None).unwrap();
        assert!(pool.shared());
        assert_eq!(b.proxy.host, "10.0.0.1");
    }

    #[test]
    fn test_explicit_proxy_wins() {
        let pool = pool(1);
        let lease = pool.lease(Some("socks5://u:p@9.9.9.9:1080")).unwrap();
        assert_eq!(lease.proxy.host, "9.9.9.9");
        // 池内代理未被占用
        let pooled = pool.lease(None).unwrap();
        pool.release(lease);
        assert_eq!(pooled.proxy.host, "10.0.0.1");
        assert!(!pool.shared());
    }

    #[test]
    fn test_empty_pool() {
        let pool = ProxyPool::new(Vec::new());
        assert!(pool.lease(None).is_none());
        assert!(pool.lease(Some("not a proxy")).is_none());
        assert!(pool.is_empty());
    }
}
