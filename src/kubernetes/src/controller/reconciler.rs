pub mod pod_watcher;
pub mod target_group;
