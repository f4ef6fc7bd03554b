use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;

use crate::platform::Channel;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

/// Append-only conversation logs: one folder per (user, channel), one file
/// per day, one line per message. Files are never truncated or rewritten.
pub struct TranscriptStore {
    root: PathBuf,
}

impl TranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Append one `[timestamp] SENDER: text` line to today's file for this
    /// user, creating the folder lazily on first write.
    pub fn record(
        &self,
        channel: Channel,
        user_id: &str,
        display_name: &str,
        text: &str,
        sender: Sender,
    ) -> Result<()> {
        let name = if display_name.is_empty() {
            "sem_nome"
        } else {
            display_name
        };

        // Both identity segments are attacker-influenced (WhatsApp feeds the
        // scraped chat name in as the user id), so sanitize each of them.
        let folder = self.root.join(channel.as_str()).join(format!(
            "{}_{}_{}",
            sanitize(user_id),
            sanitize(name),
            channel.as_str()
        ));
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create transcript folder: {}", folder.display()))?;

        let now = Local::now();
        let file_path = folder.join(format!("conversa_{}.txt", now.format("%Y-%m-%d")));

        let label = match sender {
            Sender::Bot => "BOT".to_string(),
            Sender::User => format!("USUÁRIO ({})", name),
        };
        let line = format!("[{}] {}: {}\n", now.format("%Y-%m-%d %H:%M:%S"), label, text);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .with_context(|| format!("Failed to open transcript file: {}", file_path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to transcript: {}", file_path.display()))?;

        Ok(())
    }
}

/// Replace every non-alphanumeric character with `_` so display names are
/// safe as path segments. Idempotent: `_` maps to itself.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_lines(store_root: &std::path::Path, channel: Channel, folder: &str) -> Vec<String> {
        let dir = store_root.join(channel.as_str()).join(folder);
        let date = Local::now().format("%Y-%m-%d");
        let content = std::fs::read_to_string(dir.join(format!("conversa_{}.txt", date))).unwrap();
        content.lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_two_lines_per_exchange_in_arrival_order() {
        let tmp = TempDir::new().unwrap();
        let store = TranscriptStore::new(tmp.path());

        for i in 0..3 {
            let question = format!("pergunta {}", i);
            let answer = format!("resposta {}", i);
            store
                .record(Channel::Telegram, "42", "alice", &question, Sender::User)
                .unwrap();
            store
                .record(Channel::Telegram, "42", "alice", &answer, Sender::Bot)
                .unwrap();
        }

        let lines = read_lines(tmp.path(), Channel::Telegram, "42_alice_telegram");
        assert_eq!(lines.len(), 6);
        for (i, pair) in lines.chunks(2).enumerate() {
            assert!(pair[0].ends_with(&format!("USUÁRIO (alice): pergunta {}", i)));
            assert!(pair[1].ends_with(&format!("BOT: resposta {}", i)));
        }
        // Every line carries a bracketed timestamp
        for line in &lines {
            assert!(line.starts_with('['));
            assert!(line.contains("] "));
        }
    }

    #[test]
    fn test_folder_name_is_sanitized() {
        let tmp = TempDir::new().unwrap();
        let store = TranscriptStore::new(tmp.path());
        store
            .record(Channel::Whatsapp, "Maria Silva", "Maria Silva", "oi", Sender::User)
            .unwrap();

        let channel_dir = tmp.path().join("whatsapp");
        let entries: Vec<_> = std::fs::read_dir(&channel_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["Maria_Silva_Maria_Silva_whatsapp".to_string()]);
    }

    #[test]
    fn test_user_id_with_path_separators_stays_under_root() {
        let tmp = TempDir::new().unwrap();
        let store = TranscriptStore::new(tmp.path());
        store
            .record(Channel::Whatsapp, "../../fora", "fora", "oi", Sender::User)
            .unwrap();

        // Nothing may be written outside <root>/whatsapp
        let root_entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(root_entries, vec!["whatsapp".to_string()]);

        let chat_entries: Vec<_> = std::fs::read_dir(tmp.path().join("whatsapp"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(chat_entries, vec!["______fora_fora_whatsapp".to_string()]);
    }

    #[test]
    fn test_empty_display_name_falls_back() {
        let tmp = TempDir::new().unwrap();
        let store = TranscriptStore::new(tmp.path());
        store
            .record(Channel::Telegram, "7", "", "oi", Sender::User)
            .unwrap();

        let lines = read_lines(tmp.path(), Channel::Telegram, "7_sem_nome_telegram");
        assert!(lines[0].ends_with("USUÁRIO (sem_nome): oi"));
    }

    #[test]
    fn test_sanitize_total_and_idempotent() {
        let cases = ["alice", "a b/c", "", "é!ç?", "user_1", "..", "名前 x"];
        for name in cases {
            let once = sanitize(name);
            assert!(once.chars().all(|c| c.is_alphanumeric() || c == '_'));
            assert_eq!(sanitize(&once), once);
        }
        assert_eq!(sanitize("a b/c"), "a_b_c");
    }
}
