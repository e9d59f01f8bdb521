use meshgate::core::identity::Role;
use meshgate::rpc::factory::{build_authority_client, ClientFactoryInput};
use std::time::Duration;

#[tokio::test]
async fn proxy_role_surfaces_the_direct_error_unchanged() {
    let input = ClientFactoryInput {
        authority_addresses: Vec::new(),
        role: Role::Proxy,
        client_timeout: Duration::from_secs(1),
        ssh: None,
    };
    let err = build_authority_client(input).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("no authority addresses configured"));
    assert!(!message.contains("tunnel"));
}

#[tokio::test]
async fn auth_role_never_falls_back_to_a_tunnel() {
    let input = ClientFactoryInput {
        authority_addresses: Vec::new(),
        role: Role::Auth,
        client_timeout: Duration::from_secs(1),
        ssh: None,
    };
    let err = build_authority_client(input).await.unwrap_err();
    assert!(!err.to_string().contains("tunnel"));
}

#[tokio::test]
async fn node_role_without_ssh_reports_no_tunnel_configured() {
    let input = ClientFactoryInput {
        authority_addresses: Vec::new(),
        role: Role::Node,
        client_timeout: Duration::from_secs(1),
        ssh: None,
    };
    let err = build_authority_client(input).await.unwrap_err();
    assert!(err.to_string().contains("no reverse-tunnel is configured"));
}
