use std::process::ExitCode;

use {
    anyhow::Result,
    clap::Subcommand,
    warelay_config::RelayConfig,
    warelay_whatsapp::{CredentialStore, Session},
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Show where the session lives and whether it is paired.
    Show,
    /// Delete the persisted credentials; the next run pairs from scratch.
    Clear,
}

pub async fn handle_session(action: SessionAction, config: &RelayConfig) -> Result<ExitCode> {
    let store = CredentialStore::new(config.sessions_dir(), config.session.id.as_str())?;
    match action {
        SessionAction::Show => {
            let session = if store.exists() {
                Some(store.load().await?)
            } else {
                None
            };
            for line in describe(&store, session.as_ref()) {
                println!("{line}");
            }
        },
        SessionAction::Clear => {
            if store.clear().await? {
                println!("Removed {}", store.session_dir().display());
            } else {
                println!("No session stored for '{}'.", store.session_id());
            }
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn describe(store: &CredentialStore, session: Option<&Session>) -> Vec<String> {
    let mut lines = vec![
        format!("Session:  {}", store.session_id()),
        format!("Path:     {}", store.path().display()),
    ];
    let Some(session) = session else {
        lines.push("Status:   not paired (no session file)".into());
        return lines;
    };
    lines.push(format!(
        "Status:   {}",
        if session.is_paired() {
            "paired"
        } else {
            "not paired"
        }
    ));
    if let Some(me) = session.me() {
        lines.push(format!("Account:  {me}"));
    }
    lines.push(format!("Revision: {}", session.revision));
    lines.push(format!("Keys:     {}", session.keys.len()));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path(), "baileys_session").unwrap();
        let lines = describe(&store, None);
        assert_eq!(lines[0], "Session:  baileys_session");
        assert!(lines[2].contains("not paired"));
    }

    #[test]
    fn describe_paired_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path(), "s1").unwrap();
        let mut session = Session::default();
        session.creds.insert(
            "me".into(),
            serde_json::json!({ "id": "491000@s.whatsapp.net" }),
        );
        session.revision = 4;

        let lines = describe(&store, Some(&session));
        assert!(lines.contains(&"Status:   paired".to_string()));
        assert!(lines.contains(&"Account:  491000@s.whatsapp.net".to_string()));
        assert!(lines.contains(&"Revision: 4".to_string()));
    }
}
