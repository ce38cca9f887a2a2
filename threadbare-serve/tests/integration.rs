use clap::Parser;
use threadbare_serve::{run, Args};

#[test]
fn config_flag_accepts_short_and_long_forms() {
    let args = Args::try_parse_from(["threadbare", "-f", "/etc/fe.conf"]).unwrap();
    assert_eq!(args.config.as_deref(), Some("/etc/fe.conf"));
    let args = Args::try_parse_from(["threadbare", "--config", "-"]).unwrap();
    assert_eq!(args.config.as_deref(), Some("-"));
    assert!(!args.write_config);
}

#[test]
fn write_config_conflicts_with_config() {
    assert!(Args::try_parse_from(["threadbare", "--write-config", "-f", "x.conf"]).is_err());
    assert!(Args::try_parse_from(["threadbare", "--write-config"]).unwrap().write_config);
}

#[tokio::test]
async fn missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.conf");
    let args = Args::try_parse_from(["threadbare", "-f", path.to_str().unwrap()]).unwrap();
    let err = run(args).await.unwrap_err();
    assert!(format!("{err:#}").contains("absent.conf"));
}

#[tokio::test]
async fn malformed_config_fails_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.conf");
    std::fs::write(&path, "listen_address\n").unwrap();
    let args = Args::try_parse_from(["threadbare", "-f", path.to_str().unwrap()]).unwrap();
    let err = run(args).await.unwrap_err();
    assert!(format!("{err:#}").contains("line 1"));
}

#[tokio::test]
async fn occupied_address_is_fatal() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.conf");
    std::fs::write(&path, format!("listen_address = {addr}\n")).unwrap();
    let args = Args::try_parse_from(["threadbare", "-f", path.to_str().unwrap()]).unwrap();
    let err = run(args).await.unwrap_err();
    assert!(format!("{err:#}").contains("binding listener"));
}
