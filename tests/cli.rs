use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};

fn sonraictl() -> Command {
    let mut cmd = Command::cargo_bin("sonraictl").unwrap();
    // Keep the host environment out of the picture.
    cmd.env_remove("TOKEN")
        .env_remove("SONRAI_API_SERVER")
        .env_remove("SONRAI_API_TOKENSTORE")
        .env_remove("SONRAI_API_TOKENFILE");
    cmd
}

#[test]
fn cli_version_flag() {
    sonraictl().arg("--version").assert().success().stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_help_lists_subcommands() {
    sonraictl()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("query").and(contains("findings")).and(contains("swimlanes")));
}

#[test]
fn findings_requires_a_query_source() {
    sonraictl().arg("findings").assert().failure().code(2).stderr(contains("--file"));
}

#[test]
fn findings_rejects_two_actions_at_once() {
    sonraictl()
        .args([
            "findings",
            "--url",
            "https://x.example/App/Tickets?status=NEW",
            "--close",
            "--reopen",
        ])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn findings_status_change_without_comment_is_malformed_input() {
    sonraictl()
        .args(["findings", "--url", "https://x.example/App/Tickets?status=NEW", "--close"])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("comment"));
}

#[test]
fn query_rejects_invalid_variables_before_any_network_use() {
    sonraictl()
        .args(["query", "--vars", "{not json"])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("not valid JSON"));
}

#[test]
fn identity_requires_file_or_reset() {
    sonraictl().arg("identity").assert().failure().code(2).stderr(contains("--reset"));
}

#[test]
fn no_token_anywhere_is_an_auth_failure() {
    // TOKEN is unset and the token store points at an empty directory; with
    // stdin not a terminal there is nobody to prompt, so this must fail with
    // the auth exit code rather than proceed with an empty token.
    let dir = tempfile::tempdir().unwrap();
    sonraictl()
        .env("SONRAI_API_TOKENSTORE", dir.path())
        .args(["swimlanes", "list"])
        .assert()
        .failure()
        .code(3)
        .stderr(contains("token"));
}
