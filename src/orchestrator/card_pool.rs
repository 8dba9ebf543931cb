//! 卡池
//!
//! 绑卡前 `checkout` 独占一张卡；成功后 `commit` 计一次使用，
//! 用满 `uses_per_card` 次的卡从池中移除并回写卡片文件；失败则 `release`。
//! 未 `commit` 就被 drop 的租约（例如绑卡被取消）自动归还，不计使用。
//!
//! 回写只删除用满的卡所在的行，注释、无法解析的行和其他卡片行原样保留。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::models::Card;

type Slots = Arc<Mutex<Vec<Slot>>>;

fn lock(slots: &Mutex<Vec<Slot>>) -> std::sync::MutexGuard<'_, Vec<Slot>> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

/// 一次卡片租约
pub struct CardLease {
    slot: usize,
    card: Card,
    slots: Slots,
    settled: bool,
}

impl CardLease {
    pub fn card(&self) -> &Card {
        &self.card
    }
}

impl std::fmt::Debug for CardLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardLease")
            .field("slot", &self.slot)
            .field("card", &self.card)
            .finish()
    }
}

impl Drop for CardLease {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(entry) = lock(&self.slots).get_mut(self.slot) {
            entry.leased = false;
        }
        debug!("卡片租约 {} 未完成即被丢弃，已归还", self.card.masked());
    }
}

#[derive(Debug)]
struct Slot {
    card: Card,
    uses: usize,
    leased: bool,
}

/// 共享卡池
pub struct CardPool {
    slots: Slots,
    uses_per_card: usize,
    /// 回写的卡片文件，`None` 时只在内存中计数
    file: Option<PathBuf>,
    /// 串行化文件回写
    write_lock: tokio::sync::Mutex<()>,
}

impl CardPool {
    pub fn new(cards: Vec<Card>, uses_per_card: usize, file: Option<PathBuf>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(
                cards
                    .into_iter()
                    .map(|card| Slot {
                        card,
                        uses: 0,
                        leased: false,
                    })
                    .collect(),
            )),
            uses_per_card: uses_per_card.max(1),
            file,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 租用第一张未被占用且未用满的卡
    pub async fn checkout(&self) -> Option<CardLease> {
        let mut slots = lock(&self.slots);
        let limit = self.uses_per_card;
        let (slot, entry) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| !s.leased && s.uses < limit)?;
        entry.leased = true;
        Some(CardLease {
            slot,
            card: entry.card.clone(),
            slots: self.slots.clone(),
            settled: false,
        })
    }

    /// 绑卡成功：计一次使用，必要时回写文件
    pub async fn commit(&self, mut lease: CardLease) -> Result<()> {
        lease.settled = true;
        let exhausted: HashSet<Card> = {
            let mut slots = lock(&self.slots);
            let Some(entry) = slots.get_mut(lease.slot) else {
                return Ok(());
            };
            entry.leased = false;
            entry.uses += 1;
            if entry.uses < self.uses_per_card {
                return Ok(());
            }
            info!("💳 卡片 {} 已用满 {} 次", entry.card.masked(), self.uses_per_card);
            slots
                .iter()
                .filter(|s| s.uses >= self.uses_per_card)
                .map(|s| s.card.clone())
                .collect()
        };

        match &self.file {
            Some(path) => {
                let _guard = self.write_lock.lock().await;
                rewrite_card_file(path, &exhausted).await
            }
            None => Ok(()),
        }
    }

    /// 绑卡失败：归还租约，不计使用
    pub async fn release(&self, mut lease: CardLease) {
        lease.settled = true;
        match lock(&self.slots).get_mut(lease.slot) {
            Some(entry) => entry.leased = false,
            None => warn!("⚠️ 归还了未知的卡片租约 {}", lease.card.masked()),
        }
    }

    /// 还能提供的使用次数
    pub async fn remaining_uses(&self) -> usize {
        lock(&self.slots)
            .iter()
            .map(|s| self.uses_per_card.saturating_sub(s.uses))
            .sum()
    }
}

/// 从卡片文件中删除已用满的卡，其余行原样保留
async fn rewrite_card_file(path: &Path, exhausted: &HashSet<Card>) -> Result<()> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("无法读取卡片文件 {}", path.display()));
        }
    };

    let kept: String = content
        .lines()
        .filter(|line| {
            Card::parse_line(line.trim())
                .map(|card| !exhausted.contains(&card))
                .unwrap_or(true)
        })
        .map(|line| format!("{}\n", line))
        .collect();

    let tmp = path.with_extension("txt.tmp");
    tokio::fs::write(&tmp, kept)
        .await
        .with_context(|| format!("无法写入 {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("无法替换卡片文件 {}", path.display()))?;
    Ok(())
}
