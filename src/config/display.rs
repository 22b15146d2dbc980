use std::fmt;
use crate::config::types::AppConfig;

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m"
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mListen:\x1b[0m      \x1b[32m{}:{}\x1b[0m",
            self.host, self.port
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mDocument root:\x1b[0m \x1b[36m{}\x1b[0m",
            self.document_root
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mDatabase:\x1b[0m    \x1b[33m{}@{}:{}/{}\x1b[0m (pool {})",
            self.db_user, self.db_url, self.db_port, self.db_name, self.db_pool_size
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mWorkers:\x1b[0m     \x1b[32m{}\x1b[0m threads, concurrency mode \x1b[1;32m{}\x1b[0m",
            self.thread_count,
            if self.concurrency_mode_reactor { "R" } else { "P" }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mLogging:\x1b[0m     \x1b[{}m{}\x1b[0m",
            if self.log_disabled { "31" } else { "32" },
            if self.log_disabled {
                "DISABLED".to_string()
            } else if self.log_async {
                "async".to_string()
            } else {
                "sync".to_string()
            }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mLinger on shutdown:\x1b[0m \x1b[{}m{}\x1b[0m",
            if self.linger_on_shutdown { "32" } else { "31" },
            if self.linger_on_shutdown { "YES" } else { "NO" }
        )
    }
}

pub fn display_config(config: &AppConfig) {
    println!("\n\x1b[1;35m 🌐 SERVER CONFIGURATION\x1b[0m");
    println!(
        "\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m"
    );
    print!("{}", config);
    println!(
        "\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m"
    );
    println!(" \x1b[1;32m✔\x1b[0m Configuration loaded - starting reactor\n");
}
