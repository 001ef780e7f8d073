//! Constantes del motor.
//!
//! `ENGINE_VERSION` forma parte del input del hashing de la clave de
//! idempotencia: un cambio incompatible del motor genera claves nuevas en
//! lugar de reanudar ejecuciones grabadas con semántica anterior.

/// Versión lógica del motor. Mantener estable mientras no haya cambios
/// incompatibles en el formato de `Execution` / `definition`.
pub const ENGINE_VERSION: &str = "S1.0";

/// Valor centinela de `recover_to` que marca una ejecución terminada.
pub const FINISHED: &str = "FINISHED";

/// Prefijo de las claves de contexto reservadas por el plugin `awaits`.
pub const AWAITS_NAMESPACE: &str = "awaits";

/// Prefijo de las claves de contexto reservadas por el plugin `for_each`.
pub const FOR_EACH_NAMESPACE: &str = "for_each";
