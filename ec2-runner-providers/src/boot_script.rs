use base64::Engine;
use ec2_runner_common::{Label, Repository};

pub const RUNNER_VERSION: &str = "2.278.0";

/// Build the user-data script that installs the GitHub Actions runner,
/// registers it under `label` and starts it.
pub fn build_runner_boot_script(repository: &Repository, registration_token: &str, label: &Label) -> String {
    let mut script = String::new();
    script.push_str("#!/bin/bash\n");
    script.push_str("mkdir actions-runner && cd actions-runner\n");
    script.push_str(
        "case $(uname -m) in aarch64) ARCH=\"arm64\" ;; amd64|x86_64) ARCH=\"x64\" ;; esac && export RUNNER_ARCH=${ARCH}\n",
    );
    script.push_str(&format!(
        "curl -O -L https://github.com/actions/runner/releases/download/v{0}/actions-runner-linux-${{RUNNER_ARCH}}-{0}.tar.gz\n",
        RUNNER_VERSION
    ));
    script.push_str(&format!(
        "tar xzf ./actions-runner-linux-${{RUNNER_ARCH}}-{}.tar.gz\n",
        RUNNER_VERSION
    ));
    script.push_str("export RUNNER_ALLOW_RUNASROOT=1\n");
    script.push_str("export DOTNET_SYSTEM_GLOBALIZATION_INVARIANT=1\n");
    script.push_str(&format!(
        "./config.sh --url https://github.com/{}/{} --token {} --labels {}\n",
        repository.owner, repository.repo, registration_token, label
    ));
    script.push_str("./run.sh\n");
    script
}

/// User-data as EC2 expects it: base64 of the raw script.
pub fn encode_user_data(script: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(script.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_registers_with_label_and_token() {
        let repo = Repository::parse("acme/widgets").unwrap();
        let label = Label::parse("k3x9q").unwrap();
        let script = build_runner_boot_script(&repo, "AABBCC", &label);

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains(
            "./config.sh --url https://github.com/acme/widgets --token AABBCC --labels k3x9q"
        ));
        assert!(script.contains("actions-runner-linux-${RUNNER_ARCH}-2.278.0.tar.gz"));
        assert!(script.trim_end().ends_with("./run.sh"));
    }

    #[test]
    fn user_data_is_base64() {
        let encoded = encode_user_data("#!/bin/bash\necho hi\n");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, b"#!/bin/bash\necho hi\n");
    }
}
