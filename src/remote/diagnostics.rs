//! Troubleshooting hints for SSH connection failures.

/// Expands a raw SSH failure into a message with suggestions.
pub fn diagnose_ssh_error(error: &str, host: &str, port: u16, key_file: Option<&str>) -> String {
    let error_lower = error.to_lowercase();

    let mut suggestions = Vec::new();

    if error_lower.contains("connection refused")
        || error_lower.contains("timed out")
        || error_lower.contains("no route to host")
        || error_lower.contains("resolve")
    {
        suggestions.push(format!("• Verify the host '{}' is reachable", host));
        suggestions.push(format!(
            "• Check if SSH is running on port {} (try: ssh -p {} {})",
            port, port, host
        ));
    }

    if error_lower.contains("authentication")
        || error_lower.contains("permission denied")
        || error_lower.contains("publickey")
    {
        match key_file {
            Some(key) => {
                suggestions.push(format!("• Check that the key file exists and is chmod 600: {}", key));
                suggestions.push(format!(
                    "• Verify the public key is in ~/.ssh/authorized_keys on {}",
                    host
                ));
            }
            None => {
                suggestions.push("• Pass a key file with -k or set PLOT_KEY".to_string());
                suggestions.push("• Verify your SSH agent is running (ssh-add -l)".to_string());
            }
        }
    }

    if error_lower.contains("host key") {
        suggestions.push(format!(
            "• The key offered by {} differs from ~/.ssh/known_hosts; remove the stale entry with: ssh-keygen -R {}",
            host, host
        ));
    }

    if suggestions.is_empty() {
        return error.to_string();
    }

    format!(
        "{}\n\nTroubleshooting suggestions:\n{}",
        error,
        suggestions.join("\n")
    )
}
