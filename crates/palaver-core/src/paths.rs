use dirs::data_dir;
use std::path::PathBuf;

/// ~/.local/share/Palaver   (or platform-equivalent)
pub fn palaver_home() -> PathBuf {
    data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("Palaver")
}

/// <root>/chats: one JSON config per chat.
pub fn chats_dir(root: &std::path::Path) -> PathBuf {
    root.join("chats")
}

/// <root>/models
pub fn models_dir(root: &std::path::Path) -> PathBuf {
    root.join("models")
}

/// <root>/grammars
pub fn grammars_dir(root: &std::path::Path) -> PathBuf {
    root.join("grammars")
}

/// <root>/history: persisted conversations, `<chat>.json`.
pub fn history_dir(root: &std::path::Path) -> PathBuf {
    root.join("history")
}
