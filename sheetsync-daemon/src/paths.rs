use std::path::{Path, PathBuf};

pub use sheetsync_core::config::sheetsync_root;

pub const DAEMON_LABEL: &str = "dev.sheetsync.daemon";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    sheetsync_root(home).join(DAEMON_SOCKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_lives_under_sheetsync_root() {
        let home = Path::new("/home/ava");
        assert_eq!(
            socket_path(home),
            PathBuf::from("/home/ava/.sheetsync/daemon.sock")
        );
    }
}
