//! In-process simulators for every capability trait, used when
//! `use_mock_hardware`/`use_mock_serial` is set and by the test suite.
//! Grounded in the teacher's mock responders (`mock_device_ack_responder`
//! and friends in `transport::tokio_transport::tests`), generalized from a
//! socket-level packet responder to direct trait implementations since
//! there is no wire boundary to cross for an in-process capability.

mod authenticator;
mod camera;
mod gpio;
mod link;

pub use authenticator::SimAuthenticator;
pub use camera::SimCamera;
pub use gpio::{MotorState, SimGpio};
pub use link::SimSerialLink;
