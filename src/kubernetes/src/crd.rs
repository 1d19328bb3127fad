pub mod game_server_set;
pub mod listener;
pub mod target_group;
pub mod target_group_binding;
