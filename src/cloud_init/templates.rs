//! Linux and Windows bootstrap script templates.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8Path;

use crate::driver::AGENT_PORT;
use crate::util::read_ambient;

use super::{BootstrapParams, CloudInitError};

/// Certificate files embedded into the payload, in order.
pub const CERTIFICATE_FILES: [&str; 3] = ["ca-cert.pem", "server-cert.pem", "server-key.pem"];

const LINUX_CERT_DIR: &str = "/tmp/certs";
const WINDOWS_CERT_DIR: &str = "C:/tmp/certs";
const AGENT_BINARY: &str = "lite-engine";

const LINUX_HEADER: &str = "#cloud-config
system_info:
  default_user: ~
users:
- default
- name: root
  sudo: ALL=(ALL) NOPASSWD:ALL
  groups: sudo
  ssh-authorized-keys:
  - ";

const LINUX_DOCKER: &str = "apt:
  sources:
    docker.list:
      source: deb [arch=amd64] https://download.docker.com/linux/ubuntu $RELEASE stable
      keyid: 9DC858229FC7DD38854AE2D88D81803C0EBFCD88
packages:
- docker-ce
";

const WINDOWS_SSHD: &str = "Add-WindowsCapability -Online -Name OpenSSH.Server~~~~0.0.1.0
Set-Service -Name sshd -StartupType 'Automatic'
Start-Service sshd
";

const WINDOWS_ACL: &str = "$acl = Get-Acl C:\\ProgramData\\ssh\\administrators_authorized_keys
$acl.SetAccessRuleProtection($true, $false)
$acl.Access | %{$acl.RemoveAccessRule($_)}
$administratorRule = New-Object system.security.accesscontrol.filesystemaccessrule(\"Administrator\",\"FullControl\",\"Allow\")
$acl.SetAccessRule($administratorRule)
$administratorsRule = New-Object system.security.accesscontrol.filesystemaccessrule(\"Administrators\",\"FullControl\",\"Allow\")
$acl.SetAccessRule($administratorsRule)
(Get-Item 'C:\\ProgramData\\ssh\\administrators_authorized_keys').SetAccessControl($acl)
New-ItemProperty -Path \"HKLM:\\SOFTWARE\\OpenSSH\" -Name DefaultShell -Value \"C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe\" -PropertyType String -Force
restart-service sshd
";

const WINDOWS_CHOCO: &str = "Set-ExecutionPolicy Bypass -Scope Process -Force; [System.Net.ServicePointManager]::SecurityProtocol = [System.Net.ServicePointManager]::SecurityProtocol -bor 3072; iex ((New-Object System.Net.WebClient).DownloadString('https://chocolatey.org/install.ps1'))
choco install git.install -y
";

const WINDOWS_AGENT_DIR: &str = "C:\\Program Files\\lite-engine";

/// Renders the Linux `#cloud-config` payload.
///
/// # Errors
///
/// Returns [`CloudInitError::CertificateRead`] when a certificate file in the
/// configured folder cannot be read.
pub fn linux(params: &BootstrapParams) -> Result<String, CloudInitError> {
    let mut payload = String::from(LINUX_HEADER);
    payload.push_str(params.public_key.trim_end());
    payload.push('\n');

    let Some(agent_url) = params.agent_url.as_deref() else {
        payload.push_str(LINUX_DOCKER);
        return Ok(payload);
    };

    payload.push_str("packages:\n- wget\n");
    if let Some(folder) = &params.cert_folder {
        payload.push_str("write_files:\n");
        for (file, encoded) in encode_certificates(folder)? {
            payload.push_str(&format!(
                "- path: {LINUX_CERT_DIR}/{file}\n  permissions: '0600'\n  encoding: b64\n  content: {encoded}\n"
            ));
        }
    }

    let base = agent_url.trim_end_matches('/');
    payload.push_str(&format!(
        "runcmd:
- 'wget \"{base}/{AGENT_BINARY}\" -O /usr/bin/{AGENT_BINARY}'
- 'chmod 755 /usr/bin/{AGENT_BINARY}'
- 'touch /root/.env'
- '/usr/bin/{AGENT_BINARY} server --env-file /root/.env > /var/log/{AGENT_BINARY}.log 2>&1 &'
"
    ));
    Ok(payload)
}

/// Renders the Windows `<powershell>` payload.
///
/// # Errors
///
/// Returns [`CloudInitError::CertificateRead`] when a certificate file in the
/// configured folder cannot be read.
pub fn windows(params: &BootstrapParams) -> Result<String, CloudInitError> {
    let mut payload = String::from("<powershell>\n");
    if params.agent_url.is_none() {
        payload.push_str(WINDOWS_CHOCO);
    }
    payload.push_str(WINDOWS_SSHD);
    payload.push_str(&format!(
        "$key = \"{}\"\n$key | Set-Content C:\\ProgramData\\ssh\\administrators_authorized_keys\n",
        params.public_key.trim_end()
    ));
    payload.push_str(WINDOWS_ACL);

    let Some(agent_url) = params.agent_url.as_deref() else {
        payload.push_str("</powershell>");
        return Ok(payload);
    };

    payload.push_str(&format!("mkdir \"{WINDOWS_AGENT_DIR}\"\n"));
    if let Some(folder) = &params.cert_folder {
        payload.push_str(&format!("mkdir \"{WINDOWS_CERT_DIR}\"\n"));
        for (index, (file, encoded)) in encode_certificates(folder)?.into_iter().enumerate() {
            payload.push_str(&format!(
                "$object{index} = \"{encoded}\"
$bytes = [System.Convert]::FromBase64String($object{index})
[system.io.file]::WriteAllBytes(\"{WINDOWS_CERT_DIR}/{file}\",$bytes)
"
            ));
        }
    }

    let base = agent_url.trim_end_matches('/');
    payload.push_str(&format!(
        "fsutil file createnew \"{WINDOWS_AGENT_DIR}\\.env\" 0
Invoke-WebRequest -Uri \"{base}/{AGENT_BINARY}.exe\" -OutFile \"{WINDOWS_AGENT_DIR}\\{AGENT_BINARY}.exe\"
New-NetFirewallRule -DisplayName \"ALLOW TCP PORT {AGENT_PORT}\" -Direction inbound -Profile Any -Action Allow -LocalPort {AGENT_PORT} -Protocol TCP
Start-Process -FilePath \"{WINDOWS_AGENT_DIR}\\{AGENT_BINARY}.exe\" -ArgumentList 'server','--env-file=\"{WINDOWS_AGENT_DIR}\\.env\"' -WindowStyle Hidden
</powershell>"
    ));
    Ok(payload)
}

fn encode_certificates(folder: &Utf8Path) -> Result<Vec<(&'static str, String)>, CloudInitError> {
    CERTIFICATE_FILES
        .iter()
        .map(|file| {
            let path = folder.join(file);
            let content = read_ambient(&path).map_err(|message| CloudInitError::CertificateRead {
                path: path.to_string(),
                message,
            })?;
            Ok((*file, STANDARD.encode(content)))
        })
        .collect()
}
