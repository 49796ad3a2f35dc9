//! 数据访问层 (DAO) - 每张表一个专门的操作模块

pub mod checkpoint;
pub mod signature;

pub use checkpoint::CheckpointDao;
pub use signature::SignatureDao;

use rusqlite::Connection;

/// DAO 工厂 - 统一创建各种 DAO 实例
pub struct DaoFactory;

impl DaoFactory {
    pub fn checkpoint_dao(conn: &Connection) -> CheckpointDao<'_> {
        CheckpointDao::new(conn)
    }

    pub fn signature_dao(conn: &Connection) -> SignatureDao<'_> {
        SignatureDao::new(conn)
    }
}
