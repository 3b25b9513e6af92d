// SPDX-License-Identifier: MIT OR Apache-2.0
//! Well-known metadata keys shared between the dispatcher and the session.
//!
//! The dispatcher writes these into a task's metadata; the session reads
//! them back to resolve the capability and action.  Transports must not
//! invent their own spellings.

/// Capability name the task addresses.
pub const CAPABILITY: &str = "cheshire.capability";

/// Action name within the capability.
pub const ACTION: &str = "cheshire.action";

/// End-user identifier, when the context carries one.
pub const USER_ID: &str = "cheshire.user-id";

/// Key under which the envelope payload's data map rides in a task.
pub const PAYLOAD_DATA: &str = "payload-data";

/// Key under which the envelope payload's parameters map rides in a task.
pub const PAYLOAD_PARAMETERS: &str = "payload-parameters";

/// Debug mark: when the dispatcher built the task.
pub const TASK_STARTED_AT: &str = "debug.task-started-at";

/// Debug mark: serialized summary of the request context.
pub const DEBUG_CONTEXT: &str = "debug.context";

/// Timing mark set by the pipeline processor on entry.
pub const PIPELINE_PROCESSOR_AT: &str = "pipeline-processor-at";

/// Timing mark set by the session when it builds the canonical input.
pub const SESSION_ACCEPTED_AT: &str = "session-accepted-at";
