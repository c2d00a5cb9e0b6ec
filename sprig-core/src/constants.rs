/// 核心常量定义
///
/// 作用域名称、FactoryBean 解引用前缀以及各类结构限制的默认值，
/// 容器、作用域注册表和配置加载共用这些标识符，避免硬编码不一致

/// 单例作用域名称（内置，不可覆盖）
pub const SCOPE_SINGLETON: &str = "singleton";

/// 原型作用域名称（内置，不可覆盖）
pub const SCOPE_PROTOTYPE: &str = "prototype";

/// 所有内置作用域名称
pub const RESERVED_SCOPE_NAMES: &[&str] = &[SCOPE_SINGLETON, SCOPE_PROTOTYPE];

/// 获取 FactoryBean 本身（而不是它生产的对象）时使用的名称前缀
///
/// 例如 `"&connectionFactory"` 返回工厂，`"connectionFactory"` 返回工厂的产品
pub const FACTORY_BEAN_PREFIX: &str = "&";

/// 别名链的默认最大长度
pub const DEFAULT_MAX_ALIAS_CHAIN: usize = 64;

/// 父定义链的默认最大深度
pub const DEFAULT_MAX_PARENT_DEPTH: usize = 64;

/// 单线程上嵌套创建的默认最大深度
pub const DEFAULT_MAX_CREATION_DEPTH: usize = 256;

/// 检查给定名称是否为内置作用域
///
/// # Example
/// ```
/// use sprig_core::constants::is_reserved_scope_name;
///
/// assert!(is_reserved_scope_name("singleton"));
/// assert!(is_reserved_scope_name("prototype"));
/// assert!(!is_reserved_scope_name("request"));
/// ```
pub fn is_reserved_scope_name(scope_name: &str) -> bool {
    RESERVED_SCOPE_NAMES.contains(&scope_name)
}

/// 名称是否为 FactoryBean 解引用（以 `&` 开头）
pub fn is_factory_dereference(name: &str) -> bool {
    name.starts_with(FACTORY_BEAN_PREFIX)
}

/// 去掉所有 `&` 前缀
pub fn strip_factory_prefix(name: &str) -> &str {
    name.trim_start_matches(FACTORY_BEAN_PREFIX)
}
