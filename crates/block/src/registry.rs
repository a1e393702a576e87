//! 共享缓冲区注册表
//!
//! 设备一侧维护的 vmoid → [`Vmo`] 映射表。客户端通过注册得到一个 16 位令牌，
//! 之后的请求只携带令牌，由设备通过本表找到对应的缓冲区。

use std::collections::BTreeMap;

use sync::SpinLock;

use crate::config::{MAX_VMOIDS, VMOID_INVALID};
use crate::error::{BlockError, Result};
use crate::vmo::Vmo;

struct RegistryInner {
    vmos: BTreeMap<u16, Vmo>,
    last_id: u16,
    capacity: usize,
}

/// vmoid 注册表
///
/// id 从 1 开始分配（0 为 [`VMOID_INVALID`]），每次从上一次分配的 id 之后继续查找空闲 id，
/// 到达上限后回绕。同一个缓冲区注册两次会得到两个不同的 id。
pub struct VmoidRegistry {
    inner: SpinLock<RegistryInner>,
}

impl VmoidRegistry {
    /// 创建最多容纳 `capacity` 个缓冲区的注册表
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: SpinLock::new(RegistryInner {
                vmos: BTreeMap::new(),
                last_id: VMOID_INVALID,
                capacity: capacity.min(u16::MAX as usize),
            }),
        }
    }

    /// 注册缓冲区
    ///
    /// # 错误
    /// - [`BlockError::InvalidArgument`]：缓冲区句柄无效
    /// - [`BlockError::ResourceExhausted`]：注册表已满
    pub fn attach(&self, vmo: &Vmo) -> Result<u16> {
        if !vmo.is_valid() {
            return Err(BlockError::InvalidArgument);
        }
        let mut inner = self.inner.lock();
        if inner.vmos.len() >= inner.capacity {
            return Err(BlockError::ResourceExhausted);
        }
        let mut id = inner.last_id;
        loop {
            id = id.wrapping_add(1);
            if id == VMOID_INVALID {
                continue;
            }
            if !inner.vmos.contains_key(&id) {
                break;
            }
        }
        inner.vmos.insert(id, vmo.clone());
        inner.last_id = id;
        Ok(id)
    }

    /// 注销 `id`，返回其对应的缓冲区
    ///
    /// # 错误
    /// - [`BlockError::NotFound`]：`id` 未注册或已经注销
    pub fn detach(&self, id: u16) -> Result<Vmo> {
        self.inner.lock().vmos.remove(&id).ok_or(BlockError::NotFound)
    }

    /// 查找 `id` 对应的缓冲区
    pub fn get(&self, id: u16) -> Result<Vmo> {
        self.inner
            .lock()
            .vmos
            .get(&id)
            .cloned()
            .ok_or(BlockError::NotFound)
    }

    /// 已注册的缓冲区数量
    pub fn len(&self) -> usize {
        self.inner.lock().vmos.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VmoidRegistry {
    fn default() -> Self {
        Self::new(MAX_VMOIDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_assigns_distinct_ids() {
        let registry = VmoidRegistry::default();
        let vmo = Vmo::create(512);
        let a = registry.attach(&vmo).unwrap();
        let b = registry.attach(&vmo).unwrap();
        assert_ne!(a, VMOID_INVALID);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a).unwrap().same_buffer(&vmo));
    }

    #[test]
    fn test_attach_invalid_vmo() {
        let registry = VmoidRegistry::default();
        assert_eq!(
            registry.attach(&Vmo::create(0)),
            Err(BlockError::InvalidArgument)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_exhaustion_and_reuse() {
        let registry = VmoidRegistry::new(2);
        let vmo = Vmo::create(512);
        let a = registry.attach(&vmo).unwrap();
        let _b = registry.attach(&vmo).unwrap();
        assert_eq!(registry.attach(&vmo), Err(BlockError::ResourceExhausted));

        registry.detach(a).unwrap();
        let c = registry.attach(&vmo).unwrap();
        assert_ne!(c, VMOID_INVALID);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_detach_unknown() {
        let registry = VmoidRegistry::default();
        let id = registry.attach(&Vmo::create(512)).unwrap();
        registry.detach(id).unwrap();
        assert!(matches!(registry.detach(id), Err(BlockError::NotFound)));
        assert!(matches!(registry.get(id), Err(BlockError::NotFound)));
    }

    #[test]
    fn test_ids_wrap_and_skip_in_use() {
        let registry = VmoidRegistry::new(4);
        let vmo = Vmo::create(512);
        registry.inner.lock().last_id = u16::MAX - 1;
        assert_eq!(registry.attach(&vmo).unwrap(), u16::MAX);
        // 回绕时跳过 0
        assert_eq!(registry.attach(&vmo).unwrap(), 1);
    }
}
