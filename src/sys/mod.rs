// 🛡️ Zero-Trust Architecture: collaborators sit behind traits, the manager only sees contracts.

pub mod traits;     // Collaborator contracts
pub mod secrets;    // Memory hygiene (Credential, SecretBundle)
pub mod clock;      // Lease time source
pub mod scheduler;  // Half-life renewal & refresh intervals
pub mod identity;   // SPIFFE JWT-SVID source
pub mod vault;      // Vault HTTP API
pub mod sink;       // Properties file output
