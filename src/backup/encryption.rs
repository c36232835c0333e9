// dbmagic/src/backup/encryption.rs
use std::path::{Path, PathBuf};

use crate::backup::{run_external, PipelineStep};
use crate::errors::Result;
use crate::utils::process::{CommandSpec, ProcessRunner, StdinSource};

/// Symmetric `gpg` encryption keyed by the shared archive secret.
///
/// The passphrase is written to gpg's stdin (`--passphrase-fd 0`), never to
/// the command line. Decryption reads the cipher from the packet header, so
/// archives produced with an older `--cipher-algo` keep decrypting.
pub struct GpgCipher<'a> {
    runner: &'a dyn ProcessRunner,
    secret: &'a str,
    algorithm: &'a str,
    homedir: Option<PathBuf>,
}

impl<'a> GpgCipher<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, secret: &'a str, algorithm: &'a str) -> Self {
        GpgCipher {
            runner,
            secret,
            algorithm,
            homedir: None,
        }
    }

    #[cfg(test)]
    pub fn with_homedir(mut self, homedir: &Path) -> Self {
        self.homedir = Some(homedir.to_path_buf());
        self
    }

    fn command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new("gpg").args([
            "--batch",
            "--yes",
            "--quiet",
            "--pinentry-mode",
            "loopback",
            "--passphrase-fd",
            "0",
        ]);
        if let Some(homedir) = &self.homedir {
            spec = spec.arg("--homedir").path_arg(homedir);
        }
        spec.stdin(StdinSource::Bytes(format!("{}\n", self.secret).into_bytes()))
    }

    pub async fn encrypt(&self, input: &Path, output: &Path) -> Result<()> {
        let spec = self
            .command()
            .args(["--cipher-algo", self.algorithm, "--output"])
            .path_arg(output)
            .arg("--symmetric")
            .path_arg(input);
        run_external(self.runner, PipelineStep::Encrypt, &spec).await?;
        Ok(())
    }

    pub async fn decrypt(&self, input: &Path, output: &Path) -> Result<()> {
        let spec = self
            .command()
            .arg("--output")
            .path_arg(output)
            .arg("--decrypt")
            .path_arg(input);
        run_external(self.runner, PipelineStep::Decrypt, &spec).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::utils::process::testing::{failed, FakeProcessRunner};
    use crate::utils::process::SystemProcessRunner;
    use std::fs;

    #[tokio::test]
    async fn test_secret_travels_on_stdin_only() -> anyhow::Result<()> {
        let runner = FakeProcessRunner::new(|_| failed(2));
        let cipher = GpgCipher::new(&runner, "s3cr3t", "AES256");

        let err = cipher
            .encrypt(Path::new("/tmp/shop.sql.gz"), Path::new("/tmp/shop.sql.gz.enc"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::ExternalTool {
                step: PipelineStep::Encrypt,
                exit_code: Some(2),
                ..
            }
        ));

        let call = &runner.calls()[0];
        assert_eq!(call.program, "gpg");
        assert!(!call.args.iter().any(|a| a.contains("s3cr3t")));
        assert!(call.args.windows(2).any(|w| w == ["--cipher-algo", "AES256"]));
        assert!(call.args.windows(2).any(|w| w == ["--passphrase-fd", "0"]));
        match &call.stdin {
            Some(StdinSource::Bytes(bytes)) => assert_eq!(bytes.as_slice(), b"s3cr3t\n"),
            other => panic!("unexpected stdin: {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_round_trip_with_real_gpg() -> anyhow::Result<()> {
        if which::which("gpg").is_err() {
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let homedir = dir.path().join("gnupg");
        fs::create_dir(&homedir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&homedir, fs::Permissions::from_mode(0o700))?;
        }

        let runner = SystemProcessRunner::new(dir.path().join("gpg.log"));
        let plain = dir.path().join("shop.sql.gz");
        let encrypted = dir.path().join("shop.sql.gz.enc");
        let restored = dir.path().join("restored.sql.gz");
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 251) as u8).collect();
        fs::write(&plain, &payload)?;

        for algorithm in ["AES256", "TWOFISH"] {
            let cipher = GpgCipher::new(&runner, "s3cr3t", algorithm).with_homedir(&homedir);
            cipher.encrypt(&plain, &encrypted).await?;
            assert_ne!(fs::read(&encrypted)?, payload);

            let reader = GpgCipher::new(&runner, "s3cr3t", "AES256").with_homedir(&homedir);
            reader.decrypt(&encrypted, &restored).await?;
            assert_eq!(fs::read(&restored)?, payload);
        }
        Ok(())
    }
}
