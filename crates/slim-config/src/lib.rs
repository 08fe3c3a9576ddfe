pub mod config;

pub use config::{
    parse_mounts, parse_path_list, parse_probe_cmds, Config, DockerClientConfig, DEFAULT_CMD_PORT,
    DEFAULT_EVT_PORT,
};
