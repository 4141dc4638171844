//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements     | Connects to                        |
//! |---------------|----------------|------------------------------------|
//! | `sysfs_gpio`  | PinBackend     | Linux `/sys/class/gpio`            |
//! | `serial`      | LineTransport  | UART to the probe interface board  |
//! | `journal`     | EventSink      | CSV event and reading files        |
//! | `hooks`       | HeaterPort     | external heater shutoff command    |
//! |               | Notifier       | external notification command      |
//! | `config_file` | ConfigPort     | JSON config file                   |
//! | `console`     | (none)         | stdin commands, stdout replies     |
//! | `simulation`  | PinBackend     | in-memory board                    |
//! |               | LineTransport  | simulated water and probes         |
//! |               | EventSink      | in-memory journal                  |

pub mod config_file;
pub mod console;
pub mod hooks;
pub mod journal;
pub mod serial;
pub mod simulation;
pub mod sysfs_gpio;
