// SSH execution handles built from resolved hosts and connection settings

use async_trait::async_trait;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ssh2::{
    CheckResult, HostKeyType, KeyboardInteractivePrompt, KnownHostFileKind, KnownHostKeyFormat,
    Session,
};

use super::{finish_command, shell_quote, CommandOutput, Connection, RunOptions};
use crate::output::errors::AutomateError;
use crate::topology::{ConnectionConfig, Host, ResolvedConnection};

/// Execution handle for one remote host over SSH
pub struct SshConnection {
    session: Session,
    connection_id: String,
    host_id: String,
    host_name: String,
    sudo_password: Option<String>,
}

impl SshConnection {
    /// Open a session to `host` using the connection's merged settings.
    ///
    /// Host-level overrides win over connection defaults for address, port,
    /// user, password and sudo. Credentials are omitted entirely when
    /// neither level sets them, falling back to ambient agent/key auth.
    pub fn connect(
        connection: &ResolvedConnection,
        host: &Host,
    ) -> Result<SshConnection, AutomateError> {
        let settings = &connection.settings;
        let port = connection.port_for(host);
        let timeout = Duration::from_secs(settings.connect_timeout.unwrap_or(60));

        let addr = (host.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| ssh_error(host, format!("Invalid address: {}", e), None))?
            .next()
            .ok_or_else(|| {
                ssh_error(
                    host,
                    "Address did not resolve".to_string(),
                    Some("Check the host address format".to_string()),
                )
            })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            ssh_error(
                host,
                format!("Connection failed: {}", e),
                connection_suggestion(&e),
            )
        })?;

        let mut session = Session::new()
            .map_err(|e| ssh_error(host, format!("Failed to create SSH session: {}", e), None))?;

        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);

        session.handshake().map_err(|e| {
            ssh_error(
                host,
                format!("SSH handshake failed: {}", e),
                Some("Check SSH service is running on the target".to_string()),
            )
        })?;

        verify_host_key(&session, host, settings, port)?;
        authenticate(&session, host, settings)?;

        Ok(SshConnection {
            session,
            connection_id: connection.id.clone(),
            host_id: host.id.clone(),
            host_name: host.host.clone(),
            sudo_password: connection.sudo_for(host),
        })
    }

    /// Execute a command on the open session
    fn exec(&self, command: &str, stdin: Option<&str>) -> Result<CommandOutput, AutomateError> {
        let mut channel = self.session.channel_session().map_err(|e| {
            AutomateError::Ssh {
                host: self.host_name.clone(),
                message: format!("Failed to open channel: {}", e),
                suggestion: None,
            }
        })?;

        channel.exec(command).map_err(|e| AutomateError::Ssh {
            host: self.host_name.clone(),
            message: format!("Failed to execute command: {}", e),
            suggestion: None,
        })?;

        if let Some(input) = stdin {
            channel.write_all(format!("{}\n", input).as_bytes()).ok();
            channel.send_eof().ok();
        }

        let mut stdout = String::new();
        let mut stderr = String::new();
        channel.read_to_string(&mut stdout).ok();
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().ok();
        let exited = channel.exit_status().unwrap_or(-1);

        Ok(CommandOutput {
            stdout,
            stderr,
            command: command.to_string(),
            exited,
        })
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn run(&self, command: &str, opts: RunOptions) -> Result<CommandOutput, AutomateError> {
        let mut output = self.exec(command, None)?;
        output.command = command.to_string();
        finish_command(&self.host_id, output, opts)
    }

    async fn sudo(&self, command: &str, opts: RunOptions) -> Result<CommandOutput, AutomateError> {
        let quoted = shell_quote(command);

        let mut output = match self.sudo_password.as_deref() {
            Some(password) => {
                let line = format!("sudo -S -p '' sh -c {}", quoted);
                self.exec(&line, Some(password))?
            }
            None => self.exec(&format!("sudo -n sh -c {}", quoted), None)?,
        };

        output.command = command.to_string();
        finish_command(&self.host_id, output, opts)
    }

    fn host_id(&self) -> &str {
        &self.host_id
    }

    fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

fn ssh_error(host: &Host, message: String, suggestion: Option<String>) -> AutomateError {
    AutomateError::Ssh {
        host: host.id.clone(),
        message,
        suggestion,
    }
}

fn connection_suggestion(e: &std::io::Error) -> Option<String> {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Some("Ensure SSH service is running on the target host".to_string())
        }
        std::io::ErrorKind::TimedOut => {
            Some("Check network connectivity and firewall rules".to_string())
        }
        std::io::ErrorKind::PermissionDenied => {
            Some("Check SSH key permissions and authentication".to_string())
        }
        _ => None,
    }
}

/// Enforce the host key policy for a freshly handshaken session.
///
/// With a host-level `host_key` or connection-level `known_hosts` the given
/// key lines become an in-memory store and anything not matching is
/// rejected. Without either, trust-on-first-use against
/// `~/.ssh/known_hosts`: known-good keys must match, unknown hosts are
/// accepted and persisted best-effort.
fn verify_host_key(
    session: &Session,
    host: &Host,
    settings: &ConnectionConfig,
    port: u16,
) -> Result<(), AutomateError> {
    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| ssh_error(host, "Server presented no host key".to_string(), None))?;

    let pinned: Option<Vec<String>> = match &host.host_key {
        Some(host_key) => Some(vec![format!("{} {}", host.host, host_key)]),
        None => settings.known_hosts.clone(),
    };

    let mut store = session
        .known_hosts()
        .map_err(|e| ssh_error(host, format!("Failed to create host key store: {}", e), None))?;

    if let Some(lines) = pinned {
        for line in &lines {
            let (hostname, format, blob) = parse_known_host_line(line).ok_or_else(|| {
                AutomateError::config(format!("Invalid known_hosts line: \"{}\"", line))
            })?;
            store.add(&hostname, &blob, "", format).map_err(|e| {
                ssh_error(host, format!("Failed to add host key: {}", e), None)
            })?;
        }

        match store.check_port(&host.host, port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::Mismatch => Err(ssh_error(
                host,
                "Host key mismatch".to_string(),
                Some("The server key differs from the configured host_key/known_hosts".to_string()),
            )),
            CheckResult::NotFound | CheckResult::Failure => Err(ssh_error(
                host,
                "Host key not in the configured store".to_string(),
                Some("Add the server key to host_key or known_hosts".to_string()),
            )),
        }
    } else {
        let path = dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"));
        if let Some(path) = path.as_deref() {
            if path.exists() {
                store.read_file(path, KnownHostFileKind::OpenSSH).ok();
            }
        }

        match store.check_port(&host.host, port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::Mismatch => Err(ssh_error(
                host,
                "Host key mismatch against ~/.ssh/known_hosts".to_string(),
                Some("Remove the stale entry if the server key legitimately changed".to_string()),
            )),
            CheckResult::NotFound | CheckResult::Failure => {
                // first contact: accept and persist
                store
                    .add(&host.host, key, "", host_key_format(key_type))
                    .ok();
                if let Some(path) = path.as_deref() {
                    store.write_file(path, KnownHostFileKind::OpenSSH).ok();
                }
                Ok(())
            }
        }
    }
}

/// Split a `hostname keytype base64key` line into store parameters
fn parse_known_host_line(line: &str) -> Option<(String, KnownHostKeyFormat, Vec<u8>)> {
    let mut parts = line.split_whitespace();
    let hostname = parts.next()?;
    let key_type = parts.next()?;
    let blob = BASE64.decode(parts.next()?).ok()?;
    Some((hostname.to_string(), key_type_format(key_type), blob))
}

fn key_type_format(key_type: &str) -> KnownHostKeyFormat {
    match key_type {
        "ssh-rsa" => KnownHostKeyFormat::SshRsa,
        "ssh-dss" => KnownHostKeyFormat::SshDss,
        "ecdsa-sha2-nistp256" => KnownHostKeyFormat::Ecdsa256,
        "ecdsa-sha2-nistp384" => KnownHostKeyFormat::Ecdsa384,
        "ecdsa-sha2-nistp521" => KnownHostKeyFormat::Ecdsa521,
        "ssh-ed25519" => KnownHostKeyFormat::Ed25519,
        _ => KnownHostKeyFormat::Unknown,
    }
}

fn host_key_format(key_type: HostKeyType) -> KnownHostKeyFormat {
    match key_type {
        HostKeyType::Rsa => KnownHostKeyFormat::SshRsa,
        HostKeyType::Dss => KnownHostKeyFormat::SshDss,
        HostKeyType::Ecdsa256 => KnownHostKeyFormat::Ecdsa256,
        HostKeyType::Ecdsa384 => KnownHostKeyFormat::Ecdsa384,
        HostKeyType::Ecdsa521 => KnownHostKeyFormat::Ecdsa521,
        HostKeyType::Ed25519 => KnownHostKeyFormat::Ed25519,
        HostKeyType::Unknown => KnownHostKeyFormat::Unknown,
    }
}

/// Run the authentication chain: identity file, then SSH agent when
/// allowed, then on-disk default keys when enabled, then password.
fn authenticate(
    session: &Session,
    host: &Host,
    settings: &ConnectionConfig,
) -> Result<(), AutomateError> {
    let user = host
        .user
        .clone()
        .or_else(|| settings.user.clone())
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string());

    let mut authenticated = false;

    // explicit identity file takes precedence over everything else
    let identity = host.identity.as_ref().or(settings.identity.as_ref());
    if let Some(identity) = identity {
        if session
            .userauth_pubkey_file(&user, None, Path::new(identity), None)
            .is_ok()
        {
            authenticated = true;
        }
    }

    // SSH agent only when explicitly allowed
    if !authenticated && settings.allow_agent == Some(true) {
        if let Ok(mut agent) = session.agent() {
            if agent.connect().is_ok() {
                agent.list_identities().ok();
                for agent_identity in agent.identities().unwrap_or_default() {
                    if agent.userauth(&user, &agent_identity).is_ok() {
                        authenticated = true;
                        break;
                    }
                }
            }
        }
    }

    // default on-disk keys only when lookup is enabled
    if !authenticated && settings.lookup_keys == Some(true) {
        let key_paths = [
            dirs::home_dir().map(|h| h.join(".ssh").join("id_ed25519")),
            dirs::home_dir().map(|h| h.join(".ssh").join("id_rsa")),
        ];

        for key_path in key_paths.into_iter().flatten() {
            if key_path.exists()
                && session
                    .userauth_pubkey_file(&user, None, &key_path, None)
                    .is_ok()
            {
                authenticated = true;
                break;
            }
        }
    }

    // password authentication last
    if !authenticated {
        let password = host.password.as_ref().or(settings.password.as_ref());
        if let Some(password) = password {
            if session.userauth_password(&user, password).is_ok() {
                authenticated = true;
            } else {
                // keyboard-interactive fallback (used by some PAM setups)
                let mut prompter = PasswordPrompter(password.clone());
                if session
                    .userauth_keyboard_interactive(&user, &mut prompter)
                    .is_ok()
                {
                    authenticated = true;
                }
            }
        }
    }

    if !authenticated && !session.authenticated() {
        return Err(ssh_error(
            host,
            "Authentication failed".to_string(),
            Some(
                "Configure an identity file, enable allow_agent/lookup_keys, or set a password"
                    .to_string(),
            ),
        ));
    }

    Ok(())
}

/// Helper for keyboard-interactive authentication
struct PasswordPrompter(String);

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        // Return the password for each prompt (typically just one "Password:" prompt)
        prompts.iter().map(|_| self.0.clone()).collect()
    }
}

/// Simple home directory lookup
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}
