mod common;

use alicerce::cmd::Invocation;
use alicerce::error::DeployError;
use alicerce::mysql::MysqlAdmin;
use alicerce::secrets::{CredentialTarget, RootAccess, SecretBundle};
use alicerce::DatabaseConfig;
use common::FakeHost;

const SOCKET_DENIED: &str = "ERROR 1698 (28000): Access denied for user 'root'@'localhost'";
const PASSWORD_DENIED: &str =
    "ERROR 1045 (28000): Access denied for user 'root'@'localhost' (using password: YES)";
const NO_SOCKET: &str = "ERROR 2002 (HY000): Can't connect to local MySQL server through \
                         socket '/var/run/mysqld/mysqld.sock' (2)";

fn is_mysql(inv: &Invocation) -> bool {
    inv.program == "mysql"
}

fn has_password(inv: &Invocation) -> bool {
    inv.env.iter().any(|(k, _)| k == "MYSQL_PWD")
}

#[test]
fn fresh_server_accepts_socket_auth() {
    let host = FakeHost::new();
    let db = DatabaseConfig::default();
    let admin = MysqlAdmin::new(&host, &db);

    let access = admin.detect(&SecretBundle::generate()).expect("detect");

    assert_eq!(access, RootAccess::NoPassword);
    assert_eq!(host.calls().len(), 1);
    assert!(!has_password(&host.calls()[0]));
}

#[test]
fn initialized_server_accepts_candidate_password() {
    let host = FakeHost::new().fail_when(|inv| is_mysql(inv) && !has_password(inv), SOCKET_DENIED);
    let db = DatabaseConfig::default();
    let admin = MysqlAdmin::new(&host, &db);

    let access = admin.detect(&SecretBundle::generate()).expect("detect");

    assert_eq!(access, RootAccess::Password);
}

#[test]
fn both_rejected_is_denied() {
    let host = FakeHost::new()
        .fail_when(|inv| is_mysql(inv) && !has_password(inv), SOCKET_DENIED)
        .fail_when(|inv| is_mysql(inv) && has_password(inv), PASSWORD_DENIED);
    let db = DatabaseConfig::default();
    let admin = MysqlAdmin::new(&host, &db);

    let access = admin.detect(&SecretBundle::generate()).expect("detect");

    assert_eq!(access, RootAccess::Denied);
}

#[test]
fn stopped_server_is_not_mistaken_for_missing_password() {
    let host = FakeHost::new().fail_when(is_mysql, NO_SOCKET);
    let db = DatabaseConfig::default();
    let admin = MysqlAdmin::new(&host, &db);

    let err = admin.detect(&SecretBundle::generate()).unwrap_err();

    assert!(matches!(err, DeployError::DatabaseUnreachable(_)));
}

#[test]
fn prepare_installs_and_starts_missing_server() {
    let host = FakeHost::new().missing("mysql");
    let db = DatabaseConfig::default();

    MysqlAdmin::new(&host, &db).prepare().expect("prepare");

    assert_eq!(
        host.commands(),
        vec![
            "apt-get install -y mysql-server",
            "systemctl enable --now mysql"
        ]
    );
}

#[test]
fn prepare_skips_install_when_present() {
    let host = FakeHost::new();
    let db = DatabaseConfig::default();

    MysqlAdmin::new(&host, &db).prepare().expect("prepare");

    assert_eq!(host.commands(), vec!["systemctl enable --now mysql"]);
}

#[test]
fn initialize_without_password_sets_root_password() {
    let host = FakeHost::new();
    let db = DatabaseConfig::default();
    let bundle = SecretBundle::generate();

    MysqlAdmin::new(&host, &db)
        .initialize(RootAccess::NoPassword, &bundle)
        .expect("initialize");

    let call = &host.calls()[0];
    let sql = String::from_utf8(call.stdin.clone().unwrap_or_default()).expect("utf8");
    assert!(!has_password(call));
    assert!(sql.contains("CREATE USER IF NOT EXISTS 'pillcare_user'@'localhost'"));
    assert!(sql.contains(&format!("BY '{}'", bundle.root_password)));
}

#[test]
fn initialize_with_password_leaves_root_alone() {
    let host = FakeHost::new();
    let db = DatabaseConfig::default();
    let bundle = SecretBundle::generate();

    MysqlAdmin::new(&host, &db)
        .initialize(RootAccess::Password, &bundle)
        .expect("initialize");

    let call = &host.calls()[0];
    let sql = String::from_utf8(call.stdin.clone().unwrap_or_default()).expect("utf8");
    assert!(has_password(call));
    assert!(!sql.contains("ALTER USER"));
}

#[test]
fn secrets_never_appear_in_command_lines() {
    let host = FakeHost::new();
    let db = DatabaseConfig::default();
    let bundle = SecretBundle::generate();

    MysqlAdmin::new(&host, &db)
        .initialize(RootAccess::Password, &bundle)
        .expect("initialize");

    for cmd in host.commands() {
        assert!(!cmd.contains(&bundle.root_password));
        assert!(!cmd.contains(&bundle.app_password));
    }
}
