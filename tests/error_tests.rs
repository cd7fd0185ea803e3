//! Tests for the error system.

use chrono::Utc;

use muster::error::unified::*;
use muster::error::*;

#[test]
fn connection_failed_helper_formats_server() {
    let err = MusterError::connection_failed("fs", "refused");
    assert!(matches!(&err, MusterError::ConnectionFailed { server, .. } if server == "fs"));
    assert_eq!(err.to_string(), "Connection to 'fs' failed: refused");
    assert_eq!(err.server(), Some("fs"));
}

#[test]
fn error_helper_mappings_are_stable_for_major_variants() {
    struct Case {
        error: MusterError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
        expected_recovery: RecoverySuggestion,
    }

    let io_error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();

    let cases = vec![
        Case {
            error: MusterError::Configuration("bad-config".to_string()),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckConfiguration,
        },
        Case {
            error: MusterError::UnknownServer("ghost".to_string()),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckConfiguration,
        },
        Case {
            error: MusterError::connection_failed("fs", "refused"),
            expected_category: ErrorCategory::Connection,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryWithBackoff,
        },
        Case {
            error: MusterError::Io(io_error),
            expected_category: ErrorCategory::Connection,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryWithBackoff,
        },
        Case {
            error: MusterError::ConnectionTimeout {
                server: "fs".to_string(),
                timeout_ms: 100,
            },
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::IncreaseTimeout,
        },
        Case {
            error: MusterError::Timeout(5000),
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::IncreaseTimeout,
        },
        Case {
            error: MusterError::ToolExecution {
                tool_name: "read".to_string(),
                message: "boom".to_string(),
            },
            expected_category: ErrorCategory::ToolExecution,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckToolImplementation,
        },
        Case {
            error: MusterError::NameConflict {
                name: "read".to_string(),
                server: "db".to_string(),
                existing_server: "fs".to_string(),
            },
            expected_category: ErrorCategory::Conflict,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::RenameOrNamespace,
        },
        Case {
            error: MusterError::RecoveryTimeout {
                server: None,
                budget_ms: 1000,
                started_at: Utc::now(),
                elapsed_ms: 1200,
                attempts: 3,
            },
            expected_category: ErrorCategory::Recovery,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckServerHealth,
        },
        Case {
            error: MusterError::Serialization(serde_error),
            expected_category: ErrorCategory::Serialization,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ContactSupport,
        },
        Case {
            error: MusterError::Cancelled("shutdown".to_string()),
            expected_category: ErrorCategory::Cancelled,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ContactSupport,
        },
        Case {
            error: MusterError::NotFound("tool 'x'".to_string()),
            expected_category: ErrorCategory::Unknown,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ContactSupport,
        },
    ];

    for case in cases {
        assert_eq!(
            case.error.category(),
            case.expected_category,
            "category mismatch for {}",
            case.error
        );
        assert_eq!(
            case.error.is_retryable(),
            case.expected_retryable,
            "retryable mismatch for {}",
            case.error
        );
        assert_eq!(
            case.error.recovery_suggestion(),
            case.expected_recovery,
            "recovery mismatch for {}",
            case.error
        );
    }
}

#[test]
fn retry_exhausted_keeps_the_last_error_as_source() {
    let err = MusterError::RetryExhausted {
        server: Some("db".to_string()),
        attempts: 3,
        last_error: Box::new(MusterError::Timeout(50)),
        history: Vec::new(),
    };
    assert_eq!(
        err.to_string(),
        "Retry exhausted for 'db' after 3 attempt(s): Timeout after 50ms"
    );
    assert_eq!(err.server(), Some("db"));

    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "Timeout after 50ms");
}
