//! 解封装插件实现模块.

pub mod aac;
pub mod mp3;
pub mod mp4;
pub mod wav;

use hiflow_core::HiResult;

use crate::registry::PluginRegistry;

/// 注册所有内置解封装插件
pub fn register_all_demuxers(registry: &mut PluginRegistry) -> HiResult<()> {
    registry.register(aac::plugin_def())?;
    registry.register(mp3::plugin_def())?;
    registry.register(mp4::plugin_def())?;
    registry.register(wav::plugin_def())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_注册全部插件() {
        let mut registry = PluginRegistry::new();
        register_all_demuxers(&mut registry).unwrap();
        let names: Vec<&str> = registry.list().iter().map(|(n, _, _)| *n).collect();
        assert_eq!(names, vec![aac::NAME, mp3::NAME, mp4::NAME, wav::NAME]);
        // 重复注册被拒绝
        assert!(register_all_demuxers(&mut registry).is_err());
    }
}
