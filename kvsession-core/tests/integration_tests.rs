//! Integration tests for kvsession-core infrastructure

use kvsession_core::{
    config_error, init_logging, network_error, persistence_error, protocol_error, ErrorContext,
    ErrorKind, KvSessionConfig, LogFormat, LoggingConfig, SessionError,
};

#[tokio::test]
async fn test_error_handling() {
    let error = persistence_error!("Failed to flush session", "cached_session");

    match &error {
        SessionError::Persistence {
            message, context, ..
        } => {
            assert_eq!(message, "Failed to flush session");
            assert_eq!(context.component, "cached_session");
            assert!(!context.error_id.is_empty());
        }
        _ => panic!("Expected Persistence error"),
    }

    // Logging an error should not panic without a subscriber
    error.log();
    assert!(error.is_recoverable());

    let auth_error = SessionError::Authentication {
        message: "WRONGPASS invalid username-password pair".to_string(),
        context: ErrorContext::new("pool"),
    };
    assert!(!auth_error.is_recoverable());
    assert_eq!(auth_error.kind(), ErrorKind::AuthFailure);
}

#[tokio::test]
async fn test_error_macros() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let network_err = network_error!("Failed to connect", "tcp_connector", io);
    match network_err {
        SessionError::Network {
            message,
            source,
            context,
        } => {
            assert_eq!(message, "Failed to connect");
            assert!(source.is_some());
            assert!(!context.recovery_suggestions.is_empty());
        }
        _ => panic!("Expected Network error"),
    }

    let protocol_err = protocol_error!("unexpected byte 'x'", "resp");
    assert_eq!(protocol_err.kind(), ErrorKind::Protocol);

    let config_err = config_error!("manager not initialized", "cached_manager");
    match config_err {
        SessionError::Config { context, .. } => {
            assert_eq!(context.component, "cached_manager");
            assert_eq!(context.recovery_suggestions.len(), 2);
        }
        _ => panic!("Expected Config error"),
    }
}

#[tokio::test]
async fn test_logging_initialization() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Compact,
        include_location: false,
        include_thread: false,
        log_to_file: false,
        log_file_path: None,
        enable_performance_monitoring: false,
        filter_directives: vec!["kvsession_core=debug".to_string()],
    };

    // The global subscriber can only be installed once per process, so a
    // second attempt must fail instead of panicking.
    let _ = init_logging(&config);
    tokio_test::assert_err!(init_logging(&config));
}

#[tokio::test]
async fn test_config_validation() {
    let mut config = KvSessionConfig::default();
    tokio_test::assert_ok!(config.validate());

    config.pool.max_idle = 0;
    match config.validate().unwrap_err() {
        SessionError::Config { message, .. } => {
            assert!(message.contains("max_idle"));
        }
        _ => panic!("Expected Config error"),
    }
}
