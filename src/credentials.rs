//! COPY authorization for the warehouse
//!
//! Redshift's COPY reads directly from the object store and carries its own
//! authorization clause. An IAM role is preferred when `BLUESHIFT_S3_IAM_ROLE`
//! is set; otherwise the standard AWS key environment variables are embedded
//! as a CREDENTIALS literal. Resolution happens at statement-build time so
//! rotated credentials are picked up without a restart.

use thiserror::Error;

pub const IAM_ROLE_VAR: &str = "BLUESHIFT_S3_IAM_ROLE";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("no COPY credentials available: set {IAM_ROLE_VAR} or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY")]
    Unavailable,
}

/// Authorization mode for COPY statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyCredentials {
    IamRole(String),
    Keys {
        access_key_id: String,
        secret_access_key: String,
    },
}

impl CopyCredentials {
    /// Resolve credentials from the environment.
    pub fn from_env() -> Result<Self, CredentialsError> {
        if let Ok(role) = std::env::var(IAM_ROLE_VAR)
            && !role.is_empty()
        {
            return Ok(CopyCredentials::IamRole(role));
        }

        match (
            std::env::var("AWS_ACCESS_KEY_ID"),
            std::env::var("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Ok(access_key_id), Ok(secret_access_key))
                if !access_key_id.is_empty() && !secret_access_key.is_empty() =>
            {
                Ok(CopyCredentials::Keys {
                    access_key_id,
                    secret_access_key,
                })
            }
            _ => Err(CredentialsError::Unavailable),
        }
    }

    /// Render the authorization clause of a COPY statement.
    pub fn sql_clause(&self) -> String {
        match self {
            CopyCredentials::IamRole(role) => format!("IAM_ROLE '{role}'"),
            CopyCredentials::Keys {
                access_key_id,
                secret_access_key,
            } => format!(
                "CREDENTIALS 'aws_access_key_id={access_key_id};aws_secret_access_key={secret_access_key}'"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_iam_role_is_preferred() {
        Jail::expect_with(|jail| {
            jail.set_env(IAM_ROLE_VAR, "arn:aws:iam::123456789012:role/loader");
            jail.set_env("AWS_ACCESS_KEY_ID", "AKIA");
            jail.set_env("AWS_SECRET_ACCESS_KEY", "secret");

            let creds = CopyCredentials::from_env().unwrap();
            assert_eq!(
                creds.sql_clause(),
                "IAM_ROLE 'arn:aws:iam::123456789012:role/loader'"
            );
            Ok(())
        });
    }

    #[test]
    fn test_key_chain_fallback() {
        Jail::expect_with(|jail| {
            jail.set_env(IAM_ROLE_VAR, "");
            jail.set_env("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE");
            jail.set_env("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI");

            let creds = CopyCredentials::from_env().unwrap();
            assert_eq!(
                creds.sql_clause(),
                "CREDENTIALS 'aws_access_key_id=AKIAEXAMPLE;aws_secret_access_key=wJalrXUtnFEMI'"
            );
            Ok(())
        });
    }
}
