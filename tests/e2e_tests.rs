//! End-to-end runs against Docker Hub.
//!
//! Need network access and root (chroot, unshare, mknod), so they are
//! ignored by default:
//!
//! ```sh
//! sudo -E cargo test --test e2e_tests -- --ignored
//! ```

use std::process::Command;

fn jailrun(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_jailrun"))
        .args(args)
        .output()
        .expect("run jailrun binary")
}

#[test]
#[ignore = "requires root and network"]
fn test_echo_in_alpine() {
    let out = jailrun(&["run", "alpine:latest", "/bin/echo", "hello"]);

    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
}

#[test]
#[ignore = "requires root and network"]
fn test_exit_code_relayed() {
    let out = jailrun(&["run", "alpine:latest", "/bin/sh", "-c", "exit 7"]);
    assert_eq!(out.status.code(), Some(7));
}

#[test]
#[ignore = "requires root and network"]
fn test_target_is_pid_one() {
    let out = jailrun(&["run", "alpine:latest", "/bin/sh", "-c", "echo $$"]);
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "1");
}

#[test]
#[ignore = "requires root and network"]
fn test_host_filesystem_invisible() {
    let marker = std::env::temp_dir().join("jailrun-e2e-host-marker");
    std::fs::write(&marker, b"host").unwrap();

    // Exit 1 is also every bootstrap failure, so a leak reports 3
    let script = format!("test -e {} && exit 3; exit 0", marker.display());
    let out = jailrun(&["run", "alpine:latest", "/bin/sh", "-c", &script]);

    std::fs::remove_file(&marker).ok();
    assert_ne!(out.status.code(), Some(3), "host file visible inside jail");
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
}
