use std::collections::HashMap;

use domain::{ConnectionId, DomainError, Identity};

/// 身份认领的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimGrant {
    /// 是否是同一连接的重复认领（重连后重发 claim 的场景）
    pub reclaim: bool,
    /// 认领新身份时被隐式释放的旧身份
    pub released_prior: Option<Identity>,
}

/// 身份独占锁。
///
/// 每个身份最多由一个活跃连接持有，每个连接最多持有一个身份。
/// 这是全部核心状态的所有权真相，在线状态追踪以它为准。
#[derive(Debug, Default)]
pub struct IdentityLock {
    holders: HashMap<Identity, ConnectionId>,
}

impl IdentityLock {
    pub fn new() -> Self {
        Self {
            holders: HashMap::new(),
        }
    }

    /// 认领身份。
    ///
    /// 空闲或被同一连接持有时授予；被其他连接持有时拒绝。
    /// 一个连接换持新身份时，旧身份先被释放并通过
    /// `released_prior` 报告给调用方去记录离线时间。
    pub fn claim(
        &mut self,
        identity: Identity,
        connection: ConnectionId,
    ) -> Result<ClaimGrant, DomainError> {
        match self.holders.get(&identity) {
            Some(holder) if *holder == connection => {
                return Ok(ClaimGrant {
                    reclaim: true,
                    released_prior: None,
                });
            }
            Some(_) => return Err(DomainError::identity_taken(identity)),
            None => {}
        }

        let released_prior = self.release(connection);
        self.holders.insert(identity, connection);
        Ok(ClaimGrant {
            reclaim: false,
            released_prior,
        })
    }

    /// 释放该连接当前持有的身份（如有），返回被释放的身份。幂等。
    pub fn release(&mut self, connection: ConnectionId) -> Option<Identity> {
        let held = self
            .holders
            .iter()
            .find(|(_, holder)| **holder == connection)
            .map(|(identity, _)| *identity)?;
        self.holders.remove(&held);
        Some(held)
    }

    pub fn holder_of(&self, identity: Identity) -> Option<ConnectionId> {
        self.holders.get(&identity).copied()
    }

    pub fn is_held(&self, identity: Identity) -> bool {
        self.holders.contains_key(&identity)
    }

    /// 当前被占用的身份列表，用于 identity-availability 广播。
    pub fn held_identities(&self) -> Vec<Identity> {
        Identity::ALL
            .into_iter()
            .filter(|identity| self.is_held(*identity))
            .collect()
    }
}
