//! Core types used throughout the NOS virtual memory manager

/// Process identifier type
pub type Pid = u32;

/// Exit status reported for a terminated process
pub type ExitStatus = i32;

/// Exit status of a process killed while its page fault was being resolved.
pub const FAULT_EXIT_STATUS: ExitStatus = -1;
