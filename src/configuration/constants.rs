pub mod cargo_env {
    pub const CARGO_PKG_NAME: &str = env!("CARGO_PKG_NAME");
}

pub mod common {
    pub const DEFAULT_PARALLELIZATION: usize = 1;
    pub const ENV_PREFIX: &str = "TESTAMINT";
}

pub mod readiness {
    use std::time::Duration;

    pub const MAX_TIMEOUT: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_STATUS: u16 = 200;
}

pub mod processes {
    use std::time::Duration;

    /// Bound of a stage process without its own `processTimeout`.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
    /// Bound of tool checks such as `docker compose version`.
    pub const TOOL_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
    /// How often a running child is polled for its exit.
    pub const WAIT_STEP: Duration = Duration::from_millis(20);
}

pub mod compose {
    pub const DOCKER: &str = "docker";
    pub const PROJECT_PREFIX: &str = "testamint";
}

pub mod postman {
    pub const NEWMAN: &str = "newman";
    pub const CONTAINER_WORKDIR: &str = "/etc/newman";
}

pub mod exit {
    pub const SUCCESS: i32 = 0;
    /// A test failed, or was never started.
    pub const FAILURE: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const INTERRUPTED: i32 = 130;
}
