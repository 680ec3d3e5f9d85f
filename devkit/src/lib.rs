/*!
# fleetsim DevKit - Stubs et utilitaires de test

Bibliothèque pour tester le simulateur sans analyser ni broker réels :
- Session streaming scriptée (enregistre les publications)
- Source aléatoire scriptée pour forcer une branche du scheduler
- Canal requête enregistreur (sans HTTP)
- Faux analyser HTTP (health, registration, réception des lectures)
- Harness qui câble le tout autour d'un `FleetController`
*/

pub mod downstream_stub;
pub mod fake_analyser;
pub mod random_stub;
pub mod session_stub;
pub mod test_utils;

pub use downstream_stub::RecordingChannel;
pub use fake_analyser::FakeAnalyser;
pub use random_stub::ScriptedRandom;
pub use session_stub::{MockMessage, MockStreamSession};
pub use test_utils::TestHarness;
