// Backend 注册表
// 按名称排序保存，保证平局裁决在多次运行间可复现

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{BackendError, BackendResult};
use super::runner::{CommandRunner, SystemRunner};
use super::{Backend, HeadscaleBackend, LanBackend, NetBirdBackend, TailscaleBackend};

/// 已注册 backend 的有序目录
#[derive(Clone, Default)]
pub struct Registry {
    /// 按名称排序的 backend 列表
    ordered: Vec<Arc<dyn Backend>>,
    /// 名称 -> ordered 下标
    index: HashMap<String, usize>,
}

impl Registry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册所有内置 backend，使用真实命令执行器
    pub fn with_defaults() -> Self {
        Self::with_runner(Arc::new(SystemRunner::new()))
    }

    /// 注册所有内置 backend，使用给定的命令执行器
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LanBackend::new(runner.clone())));
        registry.register(Arc::new(TailscaleBackend::new(runner.clone())));
        registry.register(Arc::new(HeadscaleBackend::new(runner.clone())));
        registry.register(Arc::new(NetBirdBackend::new(runner)));
        registry
    }

    /// 注册 backend；同名时替换旧的
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        let name = backend.name().to_string();
        if let Some(&pos) = self.index.get(&name) {
            self.ordered[pos] = backend;
            return;
        }

        let pos = self
            .ordered
            .partition_point(|existing| existing.name() < name.as_str());
        self.ordered.insert(pos, backend);
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .ordered
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name().to_string(), i))
            .collect();
    }

    /// 按名称获取
    pub fn get(&self, name: &str) -> BackendResult<Arc<dyn Backend>> {
        self.index
            .get(name)
            .map(|&i| self.ordered[i].clone())
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))
    }

    /// 是否已注册
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 按名称排序的全部 backend
    pub fn list(&self) -> &[Arc<dyn Backend>] {
        &self.ordered
    }

    /// 按名称排序的全部名称
    pub fn names(&self) -> Vec<String> {
        self.ordered.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::detector::tests::MockBackend;
    use crate::backend::runner::ScriptedRunner;

    #[test]
    fn test_registry_get_and_unknown() {
        let mut registry = Registry::new();
        registry.register(Arc::new(MockBackend::new("mock", 10)));

        assert_eq!(registry.get("mock").unwrap().name(), "mock");
        assert!(matches!(
            registry.get("nonexistent"),
            Err(BackendError::UnknownBackend(name)) if name == "nonexistent"
        ));
    }

    #[test]
    fn test_registry_list_sorted_by_name() {
        let mut registry = Registry::new();
        for name in ["zeta", "alpha", "mid", "beta"] {
            registry.register(Arc::new(MockBackend::new(name, 10)));
        }
        assert_eq!(registry.names(), vec!["alpha", "beta", "mid", "zeta"]);
        assert_eq!(registry.get("mid").unwrap().name(), "mid");
    }

    #[test]
    fn test_registry_register_replaces_same_name() {
        let mut registry = Registry::new();
        registry.register(Arc::new(MockBackend::new("dup", 10)));
        registry.register(Arc::new(MockBackend::new("dup", 99)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dup").unwrap().priority(), 99);
    }

    #[test]
    fn test_registry_defaults() {
        let registry = Registry::with_runner(Arc::new(ScriptedRunner::new()));
        assert_eq!(
            registry.names(),
            vec!["headscale", "lan", "netbird", "tailscale"]
        );
    }
}
