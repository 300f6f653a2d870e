//! System-wide constants and default paths.

use std::time::Duration;

/// Default directory for per-container metadata and network state.
pub const DEFAULT_STATE_DIR: &str = "/var/run/burrow";

/// Default directory for images, overlay layers, and mount points.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/burrow";

/// Mount table used to discover cgroup controller mount points.
pub const DEFAULT_MOUNTINFO: &str = "/proc/self/mountinfo";

/// File name of a container's metadata record.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// File name of a detached container's captured stdout.
pub const LOG_FILE_NAME: &str = "container.log";

/// File name of the persisted subnet allocation document.
pub const IPAM_FILE_NAME: &str = "subnet.json";

/// Extension of image archives in the image store.
pub const IMAGE_ARCHIVE_EXTENSION: &str = "tar";

/// File descriptor on which the container init phase reads its request.
pub const INIT_PIPE_FD: i32 = 3;

/// Number of characters in a generated container id.
pub const CONTAINER_ID_LEN: usize = 10;

/// Prefix of every cgroup directory created by the runtime.
pub const CGROUP_PREFIX: &str = "burrow";

/// Environment variable naming the pid whose namespaces `exec` joins.
pub const EXEC_PID_ENV: &str = "BURROW_EXEC_PID";

/// Environment variable carrying the JSON argv that `exec` runs.
pub const EXEC_CMD_ENV: &str = "BURROW_EXEC_CMD";

/// Upper bound on a single `ip` or `iptables` invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a container gets to exit after SIGTERM before SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// The only network driver.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Application name used in CLI output.
pub const APP_NAME: &str = "burrow";
